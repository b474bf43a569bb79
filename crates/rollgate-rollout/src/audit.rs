//! Audit trail for rollout mutations.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rollgate_platform::{PatchOp, WorkloadRef};
use rollgate_state::{AuditAction, AuditRecord, NewAuditRecord, StateStore};

use crate::error::{RolloutError, RolloutResult};

/// Destination for audit records. Called synchronously after each
/// successful patch; a failure fails the operation.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &NewAuditRecord) -> RolloutResult<()>;
}

impl AuditSink for StateStore {
    fn record(&self, entry: &NewAuditRecord) -> RolloutResult<()> {
        self.append_audit(entry)
            .map(|_: AuditRecord| ())
            .map_err(|e| RolloutError::Audit(e.to_string()))
    }
}

/// Who is acting, and against which cluster.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
    cluster: String,
    actor: String,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>, cluster: &str, actor: &str) -> Self {
        Self {
            sink,
            cluster: cluster.to_string(),
            actor: actor.to_string(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn record(
        &self,
        target: &WorkloadRef,
        action: AuditAction,
        ops: &[PatchOp],
    ) -> RolloutResult<()> {
        let payload =
            serde_json::to_value(ops).map_err(|e| RolloutError::Audit(e.to_string()))?;
        self.sink.record(&NewAuditRecord {
            cluster: self.cluster.clone(),
            namespace: target.namespace.clone(),
            kind: target.kind.to_string(),
            name: target.name.clone(),
            action,
            actor: self.actor.clone(),
            payload,
            recorded_at: epoch_secs(),
        })
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_patch_payload() {
        let store = StateStore::open_in_memory().unwrap();
        let auditor = Auditor::new(Arc::new(store.clone()), "east", "alice");
        let target = WorkloadRef::deployment("prod", "web");
        auditor
            .record(&target, AuditAction::Pause, &[PatchOp::set_paused(true)])
            .unwrap();

        let records = store.list_audit(10).unwrap();
        assert_eq!(records.len(), 1);
        let entry = &records[0].entry;
        assert_eq!(entry.cluster, "east");
        assert_eq!(entry.actor, "alice");
        assert_eq!(entry.kind, "deployment");
        assert_eq!(entry.action, AuditAction::Pause);
        assert_eq!(
            entry.payload,
            serde_json::json!([{"op": "add", "path": "/spec/paused", "value": true}])
        );
        assert!(entry.recorded_at > 0);
    }
}
