//! The orchestration-platform client interface.

use std::future::Future;
use std::pin::Pin;

use crate::error::PlatformResult;
use crate::types::{Pod, PatchOp, ReplicaGeneration, Workload, WorkloadRef};
use crate::watch::Subscription;

/// Boxed future alias used by the object-safe [`Platform`] trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Client for one cluster.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from many tasks at once. Listing calls return every object in the
/// namespace; callers correlate by owner uid.
pub trait Platform: Send + Sync {
    /// Point read of a workload, including its current status.
    fn get_workload<'a>(&'a self, target: &'a WorkloadRef)
        -> BoxFuture<'a, PlatformResult<Workload>>;

    /// Apply a JSON patch and return the updated workload.
    fn patch_workload<'a>(
        &'a self,
        target: &'a WorkloadRef,
        ops: &'a [PatchOp],
    ) -> BoxFuture<'a, PlatformResult<Workload>>;

    /// Open an ordered, live subscription to changes of exactly this
    /// workload, starting after `since` (a resource version) when given.
    fn watch_workload<'a>(
        &'a self,
        target: &'a WorkloadRef,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, PlatformResult<Subscription>>;

    fn list_replica_generations<'a>(
        &'a self,
        namespace: &'a str,
    ) -> BoxFuture<'a, PlatformResult<Vec<ReplicaGeneration>>>;

    fn list_pods<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, PlatformResult<Vec<Pod>>>;
}
