//! rollgate-platform — the orchestration-platform boundary.
//!
//! Everything the rollout orchestrator needs from a cluster goes through
//! the object-safe [`Platform`] trait: point reads, JSON patches, an
//! ordered cancellable watch, and the replica-generation / pod listings
//! used to resolve pod IPs.
//!
//! # Backends
//!
//! - **`kube`** — Kubernetes API server over HTTPS (`reqwest` + rustls)
//! - **`memory`** — in-process platform with scripted status changes,
//!   used by tests and by `rollgated --dev-platform`

pub mod decode;
pub mod error;
pub mod kube;
pub mod memory;
pub mod platform;
pub mod types;
pub mod watch;

pub use error::{PlatformError, PlatformResult};
pub use kube::{KubeConfig, KubePlatform};
pub use memory::{MemoryPlatform, RecordedPatch};
pub use platform::{BoxFuture, Platform};
pub use types::*;
pub use watch::Subscription;
