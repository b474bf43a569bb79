//! Per-workload rollout leases.
//!
//! At most one watcher may drive a workload at a time. A lease is taken
//! before the watcher subscribes and moves into the watcher task; dropping
//! it releases the workload. Holders observe cancellation through the
//! lease so that a manual pause or resume can take over.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rollgate_platform::WorkloadRef;
use tokio::sync::{Notify, watch};
use tracing::debug;

use crate::error::{RolloutError, RolloutResult};

struct Holder {
    id: u64,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct Registry {
    holders: Mutex<HashMap<String, Holder>>,
    released: Notify,
    next_id: AtomicU64,
}

impl Registry {
    fn holders(&self) -> MutexGuard<'_, HashMap<String, Holder>> {
        self.holders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keyed exclusive leases, one per workload.
#[derive(Clone, Default)]
pub struct RolloutLocks {
    registry: Arc<Registry>,
}

impl RolloutLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease key for a workload in a cluster.
    pub fn key(cluster: &str, target: &WorkloadRef) -> String {
        format!(
            "{cluster}/{}/{}/{}",
            target.namespace, target.kind, target.name
        )
    }

    /// Take the lease for `key`, failing fast if it is held.
    pub fn try_acquire(&self, key: &str) -> RolloutResult<RolloutLease> {
        let mut holders = self.registry.holders();
        if holders.contains_key(key) {
            return Err(RolloutError::RolloutInProgress(key.to_string()));
        }
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = watch::channel(false);
        holders.insert(key.to_string(), Holder { id, cancel });
        debug!(key, "rollout lease acquired");
        Ok(RolloutLease {
            key: key.to_string(),
            id,
            registry: self.registry.clone(),
            cancelled,
        })
    }

    /// Ask the current holder of `key` to stop. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        match self.registry.holders().get(key) {
            Some(holder) => {
                holder.cancel.send_replace(true);
                debug!(key, "rollout lease cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel the holder of `key` and wait until it has released the lease.
    pub async fn cancel_and_wait(&self, key: &str) {
        loop {
            let released = self.registry.released.notified();
            if !self.cancel(key) {
                return;
            }
            released.await;
        }
    }

    /// Cancel every holder. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let holders = self.registry.holders();
        for holder in holders.values() {
            holder.cancel.send_replace(true);
        }
        holders.len()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.registry.holders().contains_key(key)
    }

    /// Number of leases currently held.
    pub fn held(&self) -> usize {
        self.registry.holders().len()
    }
}

/// Exclusive right to drive one workload's rollout.
pub struct RolloutLease {
    key: String,
    id: u64,
    registry: Arc<Registry>,
    cancelled: watch::Receiver<bool>,
}

impl RolloutLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the lease has been cancelled.
    pub async fn cancelled(&mut self) {
        // The sender lives in the registry until this lease drops.
        let _ = self.cancelled.wait_for(|c| *c).await;
    }
}

impl Drop for RolloutLease {
    fn drop(&mut self) {
        let mut holders = self.registry.holders();
        if holders.get(&self.key).is_some_and(|h| h.id == self.id) {
            holders.remove(&self.key);
        }
        drop(holders);
        self.registry.released.notify_waiters();
        debug!(key = %self.key, "rollout lease released");
    }
}

impl std::fmt::Debug for RolloutLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolloutLease").field("key", &self.key).finish()
    }
}
