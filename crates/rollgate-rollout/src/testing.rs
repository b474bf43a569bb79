//! Fixtures shared by the unit tests.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use rollgate_platform::{
    ContainerImage, ControllerKind, IntOrPercent, Pod, ReplicaGeneration, RollingUpdate,
    RolloutStatus, Workload,
};

pub fn web_deployment(replicas: u32) -> Workload {
    Workload {
        uid: "uid-web".to_string(),
        name: "web".to_string(),
        namespace: "prod".to_string(),
        kind: ControllerKind::Deployment,
        labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
        resource_version: String::new(),
        desired_replicas: replicas,
        paused: false,
        strategy: Some(RollingUpdate {
            max_unavailable: IntOrPercent::Int(1),
            max_surge: IntOrPercent::Int(0),
        }),
        containers: vec![ContainerImage {
            name: "app".to_string(),
            image: "web:v1".to_string(),
        }],
        status: RolloutStatus {
            replicas,
            updated_replicas: replicas,
            ready_replicas: replicas,
            available_replicas: replicas,
            unavailable_replicas: 0,
        },
    }
}

pub fn generation(uid: &str, owner: &str, replicas: u32, created_secs: i64) -> ReplicaGeneration {
    ReplicaGeneration {
        uid: uid.to_string(),
        name: format!("web-{uid}"),
        namespace: "prod".to_string(),
        owner_uids: vec![owner.to_string()],
        desired_replicas: replicas,
        created_at: Utc
            .timestamp_opt(created_secs, 0)
            .single()
            .expect("valid timestamp"),
    }
}

pub fn pod(name: &str, owner: &str, ip: Option<&str>) -> Pod {
    Pod {
        name: name.to_string(),
        namespace: "prod".to_string(),
        ip: ip.map(str::to_string),
        owner_uids: vec![owner.to_string()],
    }
}

/// Status with `updated` of `desired` rolled and `unavailable` disrupted.
pub fn rolling(desired: u32, updated: u32, unavailable: u32) -> RolloutStatus {
    RolloutStatus {
        replicas: desired,
        updated_replicas: updated,
        ready_replicas: desired - unavailable,
        available_replicas: desired - unavailable,
        unavailable_replicas: unavailable,
    }
}
