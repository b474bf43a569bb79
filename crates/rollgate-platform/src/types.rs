//! Platform object model as seen by the rollout orchestrator.
//!
//! These are deliberately narrower than the platform's own schemas: only
//! the fields the orchestrator reads or patches are carried.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Workload identity ─────────────────────────────────────────────

/// Replicated controller kinds the backend can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl ControllerKind {
    /// Parse the lowercase path form ("deployment", "daemonset", "statefulset").
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Some(Self::Deployment),
            "daemonset" => Some(Self::DaemonSet),
            "statefulset" => Some(Self::StatefulSet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::DaemonSet => "daemonset",
            Self::StatefulSet => "statefulset",
        }
    }

    /// Plural resource name used in API paths.
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Deployment => "deployments",
            Self::DaemonSet => "daemonsets",
            Self::StatefulSet => "statefulsets",
        }
    }

    /// Only deployments carry a pausable rolling-update strategy.
    pub fn supports_step_rollout(&self) -> bool {
        matches!(self, Self::Deployment)
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one workload inside a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
    pub kind: ControllerKind,
}

impl WorkloadRef {
    pub fn new(kind: ControllerKind, namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
        }
    }

    pub fn deployment(namespace: &str, name: &str) -> Self {
        Self::new(ControllerKind::Deployment, namespace, name)
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

// ── Strategy ──────────────────────────────────────────────────────

/// A strategy field expressed either as a count or as a percentage string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrPercent {
    Int(u32),
    Percent(String),
}

impl IntOrPercent {
    /// The platform default for both rolling-update fields.
    pub fn default_rolling() -> Self {
        IntOrPercent::Percent("25%".to_string())
    }

    pub fn to_json(&self) -> Value {
        match self {
            IntOrPercent::Int(n) => Value::from(*n),
            IntOrPercent::Percent(s) => Value::from(s.clone()),
        }
    }

    /// Accepts a JSON number or string. Strings without `%` that parse as
    /// an integer are taken as counts.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(IntOrPercent::Int),
            Value::String(s) if s.contains('%') => Some(IntOrPercent::Percent(s.clone())),
            Value::String(s) => s.trim().parse::<u32>().ok().map(IntOrPercent::Int),
            _ => None,
        }
    }
}

impl fmt::Display for IntOrPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntOrPercent::Int(n) => write!(f, "{n}"),
            IntOrPercent::Percent(s) => f.write_str(s),
        }
    }
}

/// Rolling-update parameters of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    pub max_unavailable: IntOrPercent,
    pub max_surge: IntOrPercent,
}

impl Default for RollingUpdate {
    fn default() -> Self {
        Self {
            max_unavailable: IntOrPercent::default_rolling(),
            max_surge: IntOrPercent::default_rolling(),
        }
    }
}

// ── Workload ──────────────────────────────────────────────────────

/// Observed replica counts of a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    pub replicas: u32,
    pub updated_replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub unavailable_replicas: u32,
}

impl RolloutStatus {
    /// Every replica updated, ready and available, none unavailable.
    pub fn converged(&self, desired: u32) -> bool {
        self.replicas == desired
            && self.updated_replicas == desired
            && self.ready_replicas == desired
            && self.available_replicas == desired
            && self.unavailable_replicas == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub name: String,
    pub image: String,
}

/// A replicated controller as read from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub kind: ControllerKind,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_version: String,
    pub desired_replicas: u32,
    #[serde(default)]
    pub paused: bool,
    /// `None` for kinds or strategies without rolling-update batching.
    #[serde(default)]
    pub strategy: Option<RollingUpdate>,
    #[serde(default)]
    pub containers: Vec<ContainerImage>,
    #[serde(default)]
    pub status: RolloutStatus,
}

impl Workload {
    pub fn reference(&self) -> WorkloadRef {
        WorkloadRef::new(self.kind, &self.namespace, &self.name)
    }
}

// ── Generations and pods ──────────────────────────────────────────

/// Pods produced by one version of a workload's template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaGeneration {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub owner_uids: Vec<String>,
    pub desired_replicas: u32,
    pub created_at: DateTime<Utc>,
}

impl ReplicaGeneration {
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_uids.iter().any(|o| o == uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    /// Unset until the pod has been scheduled and networked.
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub owner_uids: Vec<String>,
}

impl Pod {
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_uids.iter().any(|o| o == uid)
    }
}

// ── JSON patch ────────────────────────────────────────────────────

pub const PAUSED_PATH: &str = "/spec/paused";
pub const MAX_UNAVAILABLE_PATH: &str = "/spec/strategy/rollingUpdate/maxUnavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

/// One RFC 6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl PatchOp {
    pub fn add(path: &str, value: Value) -> Self {
        Self {
            op: PatchOpKind::Add,
            path: path.to_string(),
            value: Some(value),
            from: None,
        }
    }

    pub fn replace(path: &str, value: Value) -> Self {
        Self {
            op: PatchOpKind::Replace,
            path: path.to_string(),
            value: Some(value),
            from: None,
        }
    }

    /// The single-op pause/resume toggle.
    pub fn set_paused(paused: bool) -> Self {
        Self::add(PAUSED_PATH, Value::Bool(paused))
    }

    pub fn set_max_unavailable(value: &IntOrPercent) -> Self {
        Self::replace(MAX_UNAVAILABLE_PATH, value.to_json())
    }
}

// ── Watch events ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// One change notification from a workload subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadEvent {
    pub kind: EventKind,
    pub workload: Workload,
}
