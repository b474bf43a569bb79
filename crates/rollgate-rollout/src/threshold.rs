//! Rolling-update threshold arithmetic.

use rollgate_platform::{IntOrPercent, RollingUpdate};

use crate::error::{RolloutError, RolloutResult};

/// Concrete batch limits for one desired replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub max_unavailable: u32,
    pub max_surge: u32,
}

/// Resolve a count-or-percentage against `desired`.
///
/// Percentages round down: `floor(percent * desired / 100)`. Under-allocating
/// concurrently disrupted replicas is preferred to over-allocating.
pub fn resolve_threshold(value: &IntOrPercent, desired: u32) -> RolloutResult<u32> {
    match value {
        IntOrPercent::Int(n) => Ok(*n),
        IntOrPercent::Percent(raw) => {
            let percent: u64 = raw
                .trim()
                .trim_end_matches('%')
                .trim()
                .parse()
                .map_err(|_| RolloutError::InvalidStrategyValue(raw.clone()))?;
            percent
                .checked_mul(u64::from(desired))
                .map(|scaled| scaled / 100)
                .and_then(|resolved| u32::try_from(resolved).ok())
                .ok_or_else(|| RolloutError::InvalidStrategyValue(raw.clone()))
        }
    }
}

pub fn resolve_thresholds(strategy: &RollingUpdate, desired: u32) -> RolloutResult<Thresholds> {
    Ok(Thresholds {
        max_unavailable: resolve_threshold(&strategy.max_unavailable, desired)?,
        max_surge: resolve_threshold(&strategy.max_surge, desired)?,
    })
}
