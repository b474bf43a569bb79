//! Point-in-time rollout status reads.
//!
//! Nothing here is cached: every call goes back to the platform so a
//! decision is never made on a stale count.

use rollgate_platform::{Platform, ReplicaGeneration, Workload, WorkloadRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RolloutError, RolloutResult};

/// Response payload of the rollout operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutSnapshot {
    pub replicas: u32,
    pub updated_replicas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_replicas: Option<u32>,
    #[serde(rename = "podIP")]
    pub pod_ip: Vec<String>,
    /// Present (and 1) only when nothing was unavailable at read time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_completed: Option<u8>,
}

impl RolloutSnapshot {
    /// Counts only, with an empty IP list.
    pub fn counts(replicas: u32, updated_replicas: u32) -> Self {
        Self {
            replicas,
            updated_replicas,
            ..Default::default()
        }
    }
}

pub async fn read_workload(platform: &dyn Platform, target: &WorkloadRef) -> RolloutResult<Workload> {
    Ok(platform.get_workload(target).await?)
}

/// Newest generation owned by `workload` that still wants replicas.
///
/// Generations scaled to zero (e.g. the previous template after a
/// rollback) are never active, however recent.
pub async fn active_generation(
    platform: &dyn Platform,
    workload: &Workload,
) -> RolloutResult<ReplicaGeneration> {
    let generations = platform.list_replica_generations(&workload.namespace).await?;
    generations
        .into_iter()
        .filter(|g| g.is_owned_by(&workload.uid) && g.desired_replicas > 0)
        .max_by_key(|g| g.created_at)
        .ok_or_else(|| RolloutError::NoActiveGeneration(workload.reference().to_string()))
}

/// IPs of the pods owned by a generation, in listing order. Pods not yet
/// assigned an address are skipped.
pub async fn pod_ips(
    platform: &dyn Platform,
    namespace: &str,
    generation_uid: &str,
) -> RolloutResult<Vec<String>> {
    let pods = platform.list_pods(namespace).await?;
    Ok(pods
        .into_iter()
        .filter(|p| p.is_owned_by(generation_uid))
        .filter_map(|p| p.ip)
        .collect())
}

/// Current counts plus the active generation's pod IPs.
pub async fn snapshot(platform: &dyn Platform, target: &WorkloadRef) -> RolloutResult<RolloutSnapshot> {
    let workload = read_workload(platform, target).await?;
    let pod_ip = match active_generation(platform, &workload).await {
        Ok(generation) => pod_ips(platform, &workload.namespace, &generation.uid).await?,
        Err(RolloutError::NoActiveGeneration(_)) => {
            warn!(workload = %target, "no active replica generation, reporting no pod IPs");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let status = workload.status;
    let snapshot = RolloutSnapshot {
        replicas: workload.desired_replicas,
        updated_replicas: status.updated_replicas,
        unavailable_replicas: Some(status.unavailable_replicas),
        pod_ip,
        group_completed: (status.unavailable_replicas == 0).then_some(1),
    };
    debug!(
        workload = %target,
        updated = snapshot.updated_replicas,
        unavailable = status.unavailable_replicas,
        pods = snapshot.pod_ip.len(),
        "rollout snapshot"
    );
    Ok(snapshot)
}
