//! Batch-size ("step") validation.

use rollgate_platform::IntOrPercent;

use crate::error::{RolloutError, RolloutResult};

/// A validated step, either a replica count or a percentage of desired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Absolute(u32),
    Percent(u32),
}

impl Step {
    /// The value written into `maxUnavailable`.
    pub fn to_int_or_percent(self) -> IntOrPercent {
        match self {
            Step::Absolute(n) => IntOrPercent::Int(n),
            Step::Percent(p) => IntOrPercent::Percent(format!("{p}%")),
        }
    }
}

/// Validate a caller-supplied step against the desired replica count.
///
/// Percentages must satisfy `0 < NN <= 100`, counts `0 < n <= desired`.
pub fn validate_step(step: &str, desired: u32) -> RolloutResult<Step> {
    let step = step.trim();
    if step.is_empty() {
        return Err(RolloutError::MissingStep);
    }
    let out_of_range = || RolloutError::StepOutOfRange {
        step: step.to_string(),
        desired,
    };

    if let Some(number) = step.strip_suffix('%') {
        let percent: i64 = number
            .trim()
            .parse()
            .map_err(|_| RolloutError::InvalidStep(step.to_string()))?;
        if percent <= 0 || percent > 100 {
            return Err(out_of_range());
        }
        return u32::try_from(percent)
            .map(Step::Percent)
            .map_err(|_| out_of_range());
    }

    let count: i64 = step
        .parse()
        .map_err(|_| RolloutError::InvalidStep(step.to_string()))?;
    if count <= 0 || count > i64::from(desired) {
        return Err(out_of_range());
    }
    u32::try_from(count)
        .map(Step::Absolute)
        .map_err(|_| out_of_range())
}
