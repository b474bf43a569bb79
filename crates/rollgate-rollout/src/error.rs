//! Rollout errors.

use std::time::Duration;

use rollgate_platform::PlatformError;
use thiserror::Error;

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("step cannot be empty")]
    MissingStep,

    #[error("step {step:?} is out of range for {desired} replicas")]
    StepOutOfRange { step: String, desired: u32 },

    #[error("invalid step parameter: {0:?}")]
    InvalidStep(String),

    #[error("invalid strategy value: {0:?}")]
    InvalidStrategyValue(String),

    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("no active replica generation for {0}")]
    NoActiveGeneration(String),

    #[error("{0} has no rolling update strategy")]
    WorkloadKindUnsupported(String),

    #[error("platform error: {0}")]
    Platform(PlatformError),

    #[error("audit sink failed: {0}")]
    Audit(String),

    #[error("a rollout is already in progress for {0}")]
    RolloutInProgress(String),

    #[error("rollout of {workload} made no decision within {after:?}")]
    TimedOut { workload: String, after: Duration },

    #[error("rollout watcher for {0} exited without reporting")]
    WatcherLost(String),
}

impl RolloutError {
    /// Errors raised before anything was sent to the platform.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RolloutError::MissingStep
                | RolloutError::StepOutOfRange { .. }
                | RolloutError::InvalidStep(_)
                | RolloutError::WorkloadKindUnsupported(_)
        )
    }
}

impl From<PlatformError> for RolloutError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotFound(what) => RolloutError::WorkloadNotFound(what),
            other => RolloutError::Platform(other),
        }
    }
}
