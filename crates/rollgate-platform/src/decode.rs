//! Decoding of Kubernetes API objects into the platform model.
//!
//! Only the fields the orchestrator uses are read. Missing optional fields
//! fall back to the platform defaults (one replica, 25% / 25% rolling
//! update) rather than failing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{PlatformError, PlatformResult};
use crate::types::{
    ContainerImage, ControllerKind, EventKind, IntOrPercent, Pod, ReplicaGeneration,
    RollingUpdate, RolloutStatus, Workload, WorkloadEvent,
};

fn str_at<'v>(value: &'v Value, pointer: &str) -> Option<&'v str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn u32_at(value: &Value, pointer: &str) -> Option<u32> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn required_str(value: &Value, pointer: &str) -> PlatformResult<String> {
    str_at(value, pointer)
        .map(str::to_string)
        .ok_or_else(|| PlatformError::Decode(format!("missing {pointer}")))
}

fn owner_uids(value: &Value) -> Vec<String> {
    value
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("uid").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn labels(value: &Value) -> BTreeMap<String, String> {
    value
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn containers(value: &Value) -> Vec<ContainerImage> {
    value
        .pointer("/spec/template/spec/containers")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|c| ContainerImage {
                    name: c.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    image: c.get("image").and_then(Value::as_str).unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn rolling_update(value: &Value) -> Option<RollingUpdate> {
    let strategy = value.pointer("/spec/strategy");
    let kind = strategy
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("RollingUpdate");
    if kind != "RollingUpdate" {
        return None;
    }
    let rolling = strategy.and_then(|s| s.get("rollingUpdate"));
    let field = |name: &str| {
        rolling
            .and_then(|r| r.get(name))
            .and_then(IntOrPercent::from_json)
            .unwrap_or_else(IntOrPercent::default_rolling)
    };
    Some(RollingUpdate {
        max_unavailable: field("maxUnavailable"),
        max_surge: field("maxSurge"),
    })
}

fn deployment_status(value: &Value) -> RolloutStatus {
    RolloutStatus {
        replicas: u32_at(value, "/status/replicas").unwrap_or(0),
        updated_replicas: u32_at(value, "/status/updatedReplicas").unwrap_or(0),
        ready_replicas: u32_at(value, "/status/readyReplicas").unwrap_or(0),
        available_replicas: u32_at(value, "/status/availableReplicas").unwrap_or(0),
        unavailable_replicas: u32_at(value, "/status/unavailableReplicas").unwrap_or(0),
    }
}

fn daemonset_status(value: &Value) -> RolloutStatus {
    RolloutStatus {
        replicas: u32_at(value, "/status/currentNumberScheduled").unwrap_or(0),
        updated_replicas: u32_at(value, "/status/updatedNumberScheduled").unwrap_or(0),
        ready_replicas: u32_at(value, "/status/numberReady").unwrap_or(0),
        available_replicas: u32_at(value, "/status/numberAvailable").unwrap_or(0),
        unavailable_replicas: u32_at(value, "/status/numberUnavailable").unwrap_or(0),
    }
}

fn statefulset_status(value: &Value) -> RolloutStatus {
    RolloutStatus {
        replicas: u32_at(value, "/status/replicas").unwrap_or(0),
        updated_replicas: u32_at(value, "/status/updatedReplicas").unwrap_or(0),
        ready_replicas: u32_at(value, "/status/readyReplicas").unwrap_or(0),
        available_replicas: u32_at(value, "/status/availableReplicas").unwrap_or(0),
        unavailable_replicas: 0,
    }
}

/// Decode a deployment, daemon set or stateful set object.
pub fn workload_from_value(kind: ControllerKind, value: &Value) -> PlatformResult<Workload> {
    let (desired_replicas, strategy, status) = match kind {
        ControllerKind::Deployment => (
            u32_at(value, "/spec/replicas").unwrap_or(1),
            rolling_update(value),
            deployment_status(value),
        ),
        ControllerKind::DaemonSet => (
            u32_at(value, "/status/desiredNumberScheduled").unwrap_or(0),
            None,
            daemonset_status(value),
        ),
        ControllerKind::StatefulSet => (
            u32_at(value, "/spec/replicas").unwrap_or(1),
            None,
            statefulset_status(value),
        ),
    };

    Ok(Workload {
        uid: required_str(value, "/metadata/uid")?,
        name: required_str(value, "/metadata/name")?,
        namespace: str_at(value, "/metadata/namespace").unwrap_or("default").to_string(),
        kind,
        labels: labels(value),
        resource_version: str_at(value, "/metadata/resourceVersion")
            .unwrap_or_default()
            .to_string(),
        desired_replicas,
        paused: value
            .pointer("/spec/paused")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        strategy,
        containers: containers(value),
        status,
    })
}

pub fn generation_from_value(value: &Value) -> PlatformResult<ReplicaGeneration> {
    let raw_ts = required_str(value, "/metadata/creationTimestamp")?;
    let created_at = DateTime::parse_from_rfc3339(&raw_ts)
        .map_err(|e| PlatformError::Decode(format!("creationTimestamp {raw_ts:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(ReplicaGeneration {
        uid: required_str(value, "/metadata/uid")?,
        name: required_str(value, "/metadata/name")?,
        namespace: str_at(value, "/metadata/namespace").unwrap_or("default").to_string(),
        owner_uids: owner_uids(value),
        desired_replicas: u32_at(value, "/spec/replicas").unwrap_or(0),
        created_at,
    })
}

pub fn pod_from_value(value: &Value) -> PlatformResult<Pod> {
    Ok(Pod {
        name: required_str(value, "/metadata/name")?,
        namespace: str_at(value, "/metadata/namespace").unwrap_or("default").to_string(),
        ip: str_at(value, "/status/podIP")
            .filter(|ip| !ip.is_empty())
            .map(str::to_string),
        owner_uids: owner_uids(value),
    })
}

/// Decode the `items` of a list response with `item`.
pub fn list_items<T>(
    body: &Value,
    item: impl Fn(&Value) -> PlatformResult<T>,
) -> PlatformResult<Vec<T>> {
    body.get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| PlatformError::Decode("list response without items".to_string()))?
        .iter()
        .map(item)
        .collect()
}

/// Decode one line of a watch stream.
///
/// Bookmarks yield `Ok(None)`. An `ERROR` event (typically 410 Gone for an
/// expired resource version) becomes [`PlatformError::Api`].
pub fn watch_event_from_line(
    kind: ControllerKind,
    line: &[u8],
) -> PlatformResult<Option<WorkloadEvent>> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| PlatformError::Decode(format!("watch event: {e}")))?;
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or_default();
    let object = value.get("object").unwrap_or(&Value::Null);
    let event_kind = match event_type {
        "ADDED" => EventKind::Added,
        "MODIFIED" => EventKind::Modified,
        "DELETED" => EventKind::Deleted,
        "BOOKMARK" => return Ok(None),
        "ERROR" => {
            return Err(PlatformError::Api {
                status: u32_at(object, "/code")
                    .and_then(|c| u16::try_from(c).ok())
                    .unwrap_or(500),
                message: status_message(object),
            });
        }
        other => {
            return Err(PlatformError::Decode(format!("unknown watch event type {other:?}")));
        }
    };
    Ok(Some(WorkloadEvent {
        kind: event_kind,
        workload: workload_from_value(kind, object)?,
    }))
}

/// Message of a `Status` object, or the raw body when it is not one.
pub fn status_message(body: &Value) -> String {
    match body.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment_json() -> Value {
        json!({
            "metadata": {
                "name": "web",
                "namespace": "prod",
                "uid": "d-1",
                "resourceVersion": "42",
                "labels": {"app": "web"}
            },
            "spec": {
                "replicas": 10,
                "paused": true,
                "strategy": {
                    "type": "RollingUpdate",
                    "rollingUpdate": {"maxUnavailable": 2, "maxSurge": "10%"}
                },
                "template": {"spec": {"containers": [{"name": "app", "image": "web:v1"}]}}
            },
            "status": {
                "replicas": 10,
                "updatedReplicas": 3,
                "readyReplicas": 9,
                "availableReplicas": 9,
                "unavailableReplicas": 1
            }
        })
    }

    #[test]
    fn decodes_deployment() {
        let w = workload_from_value(ControllerKind::Deployment, &deployment_json()).unwrap();
        assert_eq!(w.uid, "d-1");
        assert_eq!(w.namespace, "prod");
        assert_eq!(w.resource_version, "42");
        assert_eq!(w.desired_replicas, 10);
        assert!(w.paused);
        let strategy = w.strategy.unwrap();
        assert_eq!(strategy.max_unavailable, IntOrPercent::Int(2));
        assert_eq!(strategy.max_surge, IntOrPercent::Percent("10%".to_string()));
        assert_eq!(w.status.updated_replicas, 3);
        assert_eq!(w.status.unavailable_replicas, 1);
        assert_eq!(w.containers[0].image, "web:v1");
        assert_eq!(w.labels.get("app").map(String::as_str), Some("web"));
    }

    #[test]
    fn deployment_defaults() {
        let value = json!({"metadata": {"name": "web", "uid": "u"}, "spec": {}});
        let w = workload_from_value(ControllerKind::Deployment, &value).unwrap();
        assert_eq!(w.desired_replicas, 1);
        assert!(!w.paused);
        assert_eq!(w.strategy, Some(RollingUpdate::default()));
        assert_eq!(w.status, RolloutStatus::default());
    }

    #[test]
    fn recreate_strategy_has_no_rolling_update() {
        let value = json!({
            "metadata": {"name": "web", "uid": "u"},
            "spec": {"strategy": {"type": "Recreate"}}
        });
        let w = workload_from_value(ControllerKind::Deployment, &value).unwrap();
        assert!(w.strategy.is_none());
    }

    #[test]
    fn decodes_daemonset_counts() {
        let value = json!({
            "metadata": {"name": "agent", "namespace": "kube-system", "uid": "ds"},
            "status": {
                "desiredNumberScheduled": 4,
                "currentNumberScheduled": 4,
                "updatedNumberScheduled": 2,
                "numberReady": 3,
                "numberAvailable": 3,
                "numberUnavailable": 1
            }
        });
        let w = workload_from_value(ControllerKind::DaemonSet, &value).unwrap();
        assert_eq!(w.desired_replicas, 4);
        assert_eq!(w.status.updated_replicas, 2);
        assert_eq!(w.status.unavailable_replicas, 1);
        assert!(w.strategy.is_none());
    }

    #[test]
    fn missing_uid_is_decode_error() {
        let value = json!({"metadata": {"name": "web"}});
        let err = workload_from_value(ControllerKind::Deployment, &value).unwrap_err();
        assert!(matches!(err, PlatformError::Decode(_)));
    }

    #[test]
    fn decodes_generation_and_pod() {
        let rs = json!({
            "metadata": {
                "name": "web-abc",
                "namespace": "prod",
                "uid": "rs-1",
                "creationTimestamp": "2024-05-01T10:00:00Z",
                "ownerReferences": [{"uid": "d-1", "kind": "Deployment"}]
            },
            "spec": {"replicas": 3}
        });
        let g = generation_from_value(&rs).unwrap();
        assert!(g.is_owned_by("d-1"));
        assert_eq!(g.desired_replicas, 3);
        assert_eq!(g.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let pod = json!({
            "metadata": {"name": "web-abc-1", "ownerReferences": [{"uid": "rs-1"}]},
            "status": {"podIP": ""}
        });
        let p = pod_from_value(&pod).unwrap();
        assert!(p.is_owned_by("rs-1"));
        assert_eq!(p.ip, None);
    }

    #[test]
    fn watch_lines() {
        let line = serde_json::to_vec(&json!({"type": "MODIFIED", "object": deployment_json()}))
            .unwrap();
        let event = watch_event_from_line(ControllerKind::Deployment, &line)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Modified);
        assert_eq!(event.workload.name, "web");

        let bookmark = br#"{"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"9"}}}"#;
        assert!(watch_event_from_line(ControllerKind::Deployment, bookmark)
            .unwrap()
            .is_none());

        let gone = br#"{"type":"ERROR","object":{"kind":"Status","code":410,"message":"too old resource version"}}"#;
        match watch_event_from_line(ControllerKind::Deployment, gone) {
            Err(PlatformError::Api { status, message }) => {
                assert_eq!(status, 410);
                assert_eq!(message, "too old resource version");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }
}
