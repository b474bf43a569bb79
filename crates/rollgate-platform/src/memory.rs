//! In-process platform.
//!
//! Holds workloads, generations and pods in memory, applies the subset of
//! JSON patch the orchestrator issues, and fans every change out to open
//! subscriptions. Tests drive rollouts by calling [`MemoryPlatform::set_status`]
//! the way the platform's controllers would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::{BoxFuture, Platform};
use crate::types::{
    EventKind, IntOrPercent, Pod, PatchOp, PatchOpKind, ReplicaGeneration, RolloutStatus,
    Workload, WorkloadEvent, WorkloadRef, MAX_UNAVAILABLE_PATH, PAUSED_PATH,
};
use crate::watch::{SUBSCRIPTION_BUFFER, Subscription};

const EVENT_BUFFER: usize = 256;
const MAX_SURGE_PATH: &str = "/spec/strategy/rollingUpdate/maxSurge";
const REPLICAS_PATH: &str = "/spec/replicas";
const CONTAINERS_PREFIX: &str = "/spec/template/spec/containers/";

/// A patch as received by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPatch {
    pub target: WorkloadRef,
    pub ops: Vec<PatchOp>,
}

#[derive(Debug, Clone)]
enum MemoryEvent {
    Change(WorkloadEvent),
    Fail { status: u16, message: String },
    CloseAll,
}

#[derive(Default)]
struct Inner {
    workloads: HashMap<WorkloadRef, Workload>,
    generations: Vec<ReplicaGeneration>,
    pods: Vec<Pod>,
    patches: Vec<RecordedPatch>,
    fail_patch_path: Option<String>,
    revision: u64,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

#[derive(Clone)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<MemoryEvent>,
    watchers: Arc<watch::Sender<usize>>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (watchers, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
            watchers: Arc::new(watchers),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, kind: EventKind, workload: &Workload) {
        // No receivers is fine.
        let _ = self.events.send(MemoryEvent::Change(WorkloadEvent {
            kind,
            workload: workload.clone(),
        }));
    }

    /// Create or replace a workload. Assigns a fresh resource version.
    pub fn insert_workload(&self, mut workload: Workload) -> Workload {
        let mut inner = self.lock();
        workload.resource_version = inner.next_revision();
        let existed = inner
            .workloads
            .insert(workload.reference(), workload.clone())
            .is_some();
        drop(inner);
        let kind = if existed { EventKind::Modified } else { EventKind::Added };
        self.emit(kind, &workload);
        workload
    }

    pub fn workload(&self, target: &WorkloadRef) -> Option<Workload> {
        self.lock().workloads.get(target).cloned()
    }

    pub fn remove_workload(&self, target: &WorkloadRef) -> Option<Workload> {
        let removed = self.lock().workloads.remove(target);
        if let Some(workload) = &removed {
            self.emit(EventKind::Deleted, workload);
        }
        removed
    }

    /// Replace the observed status, as the platform's controllers would.
    pub fn set_status(
        &self,
        target: &WorkloadRef,
        status: RolloutStatus,
    ) -> PlatformResult<Workload> {
        let mut inner = self.lock();
        let revision = inner.next_revision();
        let workload = inner
            .workloads
            .get_mut(target)
            .ok_or_else(|| PlatformError::NotFound(target.to_string()))?;
        workload.status = status;
        workload.resource_version = revision;
        let updated = workload.clone();
        drop(inner);
        self.emit(EventKind::Modified, &updated);
        Ok(updated)
    }

    pub fn add_generation(&self, generation: ReplicaGeneration) {
        self.lock().generations.push(generation);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.lock().pods.push(pod);
    }

    /// Every patch received so far, in order.
    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.lock().patches.clone()
    }

    /// Reject subsequent patches that touch `path`.
    pub fn fail_patch_path(&self, path: &str) {
        self.lock().fail_patch_path = Some(path.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().fail_patch_path = None;
    }

    /// Number of subscriptions currently open.
    pub fn active_watchers(&self) -> usize {
        *self.watchers.borrow()
    }

    /// Wait until exactly `count` subscriptions are open.
    pub async fn wait_for_watchers(&self, count: usize) {
        let mut rx = self.watchers.subscribe();
        // The sender lives as long as self, so this only ends on a match.
        let _ = rx.wait_for(|n| *n == count).await;
    }

    /// End every open subscription as if the platform closed the stream.
    pub fn close_watches(&self) {
        let _ = self.events.send(MemoryEvent::CloseAll);
    }

    /// End every open subscription with an error event, as an API server
    /// does when it sends a watch `ERROR` object.
    pub fn fail_watches(&self, status: u16, message: &str) {
        let _ = self.events.send(MemoryEvent::Fail {
            status,
            message: message.to_string(),
        });
    }

    fn apply_patch(&self, target: &WorkloadRef, ops: &[PatchOp]) -> PlatformResult<Workload> {
        let mut inner = self.lock();
        if let Some(path) = &inner.fail_patch_path {
            if ops.iter().any(|op| &op.path == path) {
                return Err(PlatformError::Api {
                    status: 500,
                    message: format!("injected failure for {path}"),
                });
            }
        }
        let mut workload = inner
            .workloads
            .get(target)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(target.to_string()))?;
        for op in ops {
            apply_op(&mut workload, op)?;
        }
        workload.resource_version = inner.next_revision();
        inner.workloads.insert(target.clone(), workload.clone());
        inner.patches.push(RecordedPatch {
            target: target.clone(),
            ops: ops.to_vec(),
        });
        drop(inner);
        debug!(workload = %target, ops = ops.len(), "memory patch applied");
        self.emit(EventKind::Modified, &workload);
        Ok(workload)
    }

    fn subscribe(&self, target: &WorkloadRef, since: Option<&str>) -> Subscription {
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let target = target.clone();
        let since: u64 = since.and_then(|rv| rv.parse().ok()).unwrap_or(0);

        let pump = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(MemoryEvent::Change(event)) => {
                        if event.workload.reference() != target {
                            continue;
                        }
                        let revision: u64 = event.workload.resource_version.parse().unwrap_or(0);
                        if revision <= since {
                            continue;
                        }
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    Ok(MemoryEvent::Fail { status, message }) => {
                        let _ = tx.send(Err(PlatformError::Api { status, message })).await;
                        return;
                    }
                    Ok(MemoryEvent::CloseAll) => return,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        let _ = tx
                            .send(Err(PlatformError::Transport(format!(
                                "watch lagged by {missed} events"
                            ))))
                            .await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        self.watchers.send_modify(|n| *n += 1);
        let watchers = self.watchers.clone();
        Subscription::new(rx, pump).with_stop_hook(move || {
            watchers.send_modify(|n| *n = n.saturating_sub(1));
        })
    }
}

fn value_of(op: &PatchOp) -> PlatformResult<&Value> {
    op.value
        .as_ref()
        .ok_or_else(|| PlatformError::Rejected(format!("{:?} {} without value", op.op, op.path)))
}

fn apply_op(workload: &mut Workload, op: &PatchOp) -> PlatformResult<()> {
    if !matches!(op.op, PatchOpKind::Add | PatchOpKind::Replace) {
        return Err(PlatformError::Rejected(format!(
            "unsupported op {:?} at {}",
            op.op, op.path
        )));
    }
    let value = value_of(op)?;
    match op.path.as_str() {
        PAUSED_PATH => {
            workload.paused = value
                .as_bool()
                .ok_or_else(|| PlatformError::Rejected("spec.paused must be a bool".to_string()))?;
        }
        MAX_UNAVAILABLE_PATH | MAX_SURGE_PATH => {
            let parsed = IntOrPercent::from_json(value).ok_or_else(|| {
                PlatformError::Rejected(format!("invalid value {value} for {}", op.path))
            })?;
            let strategy = workload.strategy.as_mut().ok_or_else(|| {
                PlatformError::Rejected(format!("{} has no rolling update strategy", workload.name))
            })?;
            if op.path == MAX_UNAVAILABLE_PATH {
                strategy.max_unavailable = parsed;
            } else {
                strategy.max_surge = parsed;
            }
        }
        REPLICAS_PATH => {
            workload.desired_replicas = value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| PlatformError::Rejected("spec.replicas must be a count".to_string()))?;
        }
        path => {
            let image = path
                .strip_prefix(CONTAINERS_PREFIX)
                .and_then(|rest| rest.strip_suffix("/image"))
                .and_then(|index| index.parse::<usize>().ok())
                .and_then(|index| workload.containers.get_mut(index))
                .ok_or_else(|| PlatformError::Rejected(format!("unsupported path {path}")))?;
            image.image = value
                .as_str()
                .ok_or_else(|| PlatformError::Rejected("image must be a string".to_string()))?
                .to_string();
        }
    }
    Ok(())
}

impl Platform for MemoryPlatform {
    fn get_workload<'a>(
        &'a self,
        target: &'a WorkloadRef,
    ) -> BoxFuture<'a, PlatformResult<Workload>> {
        Box::pin(async move {
            self.workload(target)
                .ok_or_else(|| PlatformError::NotFound(target.to_string()))
        })
    }

    fn patch_workload<'a>(
        &'a self,
        target: &'a WorkloadRef,
        ops: &'a [PatchOp],
    ) -> BoxFuture<'a, PlatformResult<Workload>> {
        Box::pin(async move { self.apply_patch(target, ops) })
    }

    fn watch_workload<'a>(
        &'a self,
        target: &'a WorkloadRef,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, PlatformResult<Subscription>> {
        Box::pin(async move {
            if self.workload(target).is_none() {
                return Err(PlatformError::NotFound(target.to_string()));
            }
            Ok(self.subscribe(target, since))
        })
    }

    fn list_replica_generations<'a>(
        &'a self,
        namespace: &'a str,
    ) -> BoxFuture<'a, PlatformResult<Vec<ReplicaGeneration>>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .generations
                .iter()
                .filter(|g| g.namespace == namespace)
                .cloned()
                .collect())
        })
    }

    fn list_pods<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, PlatformResult<Vec<Pod>>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .pods
                .iter()
                .filter(|p| p.namespace == namespace)
                .cloned()
                .collect())
        })
    }
}
