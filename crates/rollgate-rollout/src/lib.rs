//! rollgate-rollout — staged rolling updates for deployment workloads.
//!
//! A staged rollout moves a deployment to a new template a batch at a
//! time: the step size is written into `maxUnavailable`, a watcher follows
//! the workload's status stream, and the deployment is paused whenever the
//! updated count crosses the next batch boundary. Operators then release
//! the next batch (step resume), the rest (all resume), or stop it (pause).
//!
//! # Components
//!
//! - **`threshold`** — count-or-percentage strategy values to integers
//! - **`step`** — batch-size validation
//! - **`status`** — point-in-time reads, active generation and pod IPs
//! - **`watcher`** — the pause/resume decision and its event-driven driver
//! - **`lock`** — per-workload leases so only one watcher drives a workload
//! - **`audit`** — audit sink for every successful patch
//! - **`controller`** — the public operations

pub mod audit;
pub mod controller;
pub mod error;
pub mod lock;
pub mod status;
pub mod step;
pub mod threshold;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{AuditSink, Auditor};
pub use controller::{DEFAULT_WATCH_TIMEOUT, RolloutController, RolloutOptions, RolloutSettings};
pub use error::{RolloutError, RolloutResult};
pub use lock::{RolloutLease, RolloutLocks};
pub use status::RolloutSnapshot;
pub use step::{Step, validate_step};
pub use threshold::{Thresholds, resolve_threshold, resolve_thresholds};
pub use watcher::{BatchWatch, Decision, RolloutWatcher, WatchOutcome, WatchPhase};
