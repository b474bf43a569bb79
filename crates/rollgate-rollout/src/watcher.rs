//! Rollout event watcher.
//!
//! [`BatchWatch`] is the pure pause/resume decision over a sequence of
//! status observations. [`RolloutWatcher`] drives it from a live workload
//! subscription and applies the resulting patch.
//!
//! A batch ends when `updated == checkpoint + maxUnavailable + maxSurge + 1`:
//! the first replica past the allowed disruption window starting to update
//! is what triggers the pause, so every pause lands on a batch boundary.

use std::sync::Arc;
use std::time::Duration;

use rollgate_platform::{
    EventKind, IntOrPercent, PatchOp, Platform, RolloutStatus, Subscription, Workload,
    WorkloadRef,
};
use rollgate_state::AuditAction;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::Auditor;
use crate::error::{RolloutError, RolloutResult};
use crate::lock::RolloutLease;
use crate::status::read_workload;
use crate::threshold::{Thresholds, resolve_thresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchPhase {
    Idle,
    RollingForward,
    Paused,
    Completed,
    TimedOut,
    Cancelled,
}

impl WatchPhase {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WatchPhase::Idle | WatchPhase::RollingForward)
    }
}

/// What to do after one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    /// Batch boundary crossed: set `paused = true`.
    Pause,
    /// Fully rolled out after a staged batch: set `paused = false`.
    Resume,
    /// Fully rolled out, nothing to patch.
    Converged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Batch { checkpoint: u32, thresholds: Thresholds },
    Convergence,
}

/// Decision state for one watcher invocation.
#[derive(Debug, Clone)]
pub struct BatchWatch {
    desired: u32,
    mode: Mode,
    phase: WatchPhase,
}

impl BatchWatch {
    /// Stop at the next batch boundary. The checkpoint is the current
    /// `updated` count, or 0 when that already equals `desired` (a finished
    /// rollout is being restarted).
    pub fn batch(desired: u32, updated: u32, thresholds: Thresholds) -> Self {
        let checkpoint = if updated == desired { 0 } else { updated };
        Self {
            desired,
            mode: Mode::Batch {
                checkpoint,
                thresholds,
            },
            phase: WatchPhase::Idle,
        }
    }

    /// Run until every replica is updated and available.
    pub fn convergence(desired: u32) -> Self {
        Self {
            desired,
            mode: Mode::Convergence,
            phase: WatchPhase::Idle,
        }
    }

    pub fn checkpoint(&self) -> Option<u32> {
        match self.mode {
            Mode::Batch { checkpoint, .. } => Some(checkpoint),
            Mode::Convergence => None,
        }
    }

    /// `updated` count at which the watcher pauses.
    pub fn pause_boundary(&self) -> Option<u32> {
        match self.mode {
            Mode::Batch {
                checkpoint,
                thresholds,
            } => Some(
                checkpoint
                    .saturating_add(thresholds.max_unavailable)
                    .saturating_add(thresholds.max_surge)
                    .saturating_add(1),
            ),
            Mode::Convergence => None,
        }
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    pub fn observe(&mut self, status: &RolloutStatus) -> Decision {
        if self.phase.is_terminal() {
            return Decision::Continue;
        }
        if self.pause_boundary() == Some(status.updated_replicas) {
            self.phase = WatchPhase::Paused;
            return Decision::Pause;
        }
        if status.converged(self.desired) {
            match self.mode {
                Mode::Batch { checkpoint, .. } if checkpoint != 0 => {
                    self.phase = WatchPhase::Completed;
                    return Decision::Resume;
                }
                Mode::Convergence => {
                    self.phase = WatchPhase::Completed;
                    return Decision::Converged;
                }
                Mode::Batch { .. } => {}
            }
        }
        self.phase = WatchPhase::RollingForward;
        Decision::Continue
    }

    fn finish(&mut self, phase: WatchPhase) {
        if !self.phase.is_terminal() {
            self.phase = phase;
        }
    }
}

/// How one watcher invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchOutcome {
    Paused,
    Completed,
    /// The platform ended the stream before a decision.
    StreamClosed,
    TimedOut,
    Cancelled,
}

/// A subscription opened against a known workload state, ready to run.
pub struct PreparedWatch {
    target: WorkloadRef,
    uid: String,
    batch: BatchWatch,
    subscription: Subscription,
}

impl PreparedWatch {
    pub fn target(&self) -> &WorkloadRef {
        &self.target
    }

    pub fn batch(&self) -> &BatchWatch {
        &self.batch
    }
}

#[derive(Clone)]
pub struct RolloutWatcher {
    platform: Arc<dyn Platform>,
    auditor: Auditor,
    deadline: Duration,
}

impl RolloutWatcher {
    pub fn new(platform: Arc<dyn Platform>, auditor: Auditor, deadline: Duration) -> Self {
        Self {
            platform,
            auditor,
            deadline,
        }
    }

    /// Read the workload, resolve its thresholds and subscribe from the
    /// read's resource version. Must happen before the patch that starts
    /// the rollout so none of its events are missed.
    ///
    /// `max_unavailable` replaces the strategy's value when the caller is
    /// about to patch it in.
    pub async fn prepare(
        &self,
        target: &WorkloadRef,
        max_unavailable: Option<&IntOrPercent>,
    ) -> RolloutResult<PreparedWatch> {
        let workload = read_workload(self.platform.as_ref(), target).await?;
        let mut strategy = workload
            .strategy
            .clone()
            .ok_or_else(|| RolloutError::WorkloadKindUnsupported(target.to_string()))?;
        if let Some(value) = max_unavailable {
            strategy.max_unavailable = value.clone();
        }
        let thresholds = resolve_thresholds(&strategy, workload.desired_replicas)?;
        let batch = BatchWatch::batch(
            workload.desired_replicas,
            workload.status.updated_replicas,
            thresholds,
        );
        info!(
            workload = %target,
            desired = workload.desired_replicas,
            checkpoint = ?batch.checkpoint(),
            max_unavailable = thresholds.max_unavailable,
            max_surge = thresholds.max_surge,
            pause_at = ?batch.pause_boundary(),
            "watching rollout batch"
        );
        self.subscribe(workload, batch).await
    }

    /// Like [`prepare`](Self::prepare) but only waits for convergence.
    pub async fn prepare_convergence(&self, target: &WorkloadRef) -> RolloutResult<PreparedWatch> {
        let workload = read_workload(self.platform.as_ref(), target).await?;
        let batch = BatchWatch::convergence(workload.desired_replicas);
        info!(workload = %target, desired = workload.desired_replicas, "watching rollout convergence");
        self.subscribe(workload, batch).await
    }

    async fn subscribe(&self, workload: Workload, batch: BatchWatch) -> RolloutResult<PreparedWatch> {
        let target = workload.reference();
        let subscription = self
            .platform
            .watch_workload(&target, Some(&workload.resource_version))
            .await?;
        Ok(PreparedWatch {
            target,
            uid: workload.uid,
            batch,
            subscription,
        })
    }

    /// Consume events until a decision, the stream ending, the deadline, or
    /// cancellation through `lease`. The subscription is stopped on every
    /// exit path.
    pub async fn run(
        &self,
        mut prepared: PreparedWatch,
        lease: &mut RolloutLease,
    ) -> RolloutResult<WatchOutcome> {
        let bounded = tokio::time::timeout(self.deadline, self.consume(&mut prepared, lease)).await;
        let result = match bounded {
            Ok(result) => result,
            Err(_) => {
                prepared.batch.finish(WatchPhase::TimedOut);
                warn!(
                    workload = %prepared.target,
                    after = ?self.deadline,
                    "rollout watch deadline elapsed"
                );
                Ok(WatchOutcome::TimedOut)
            }
        };
        prepared.subscription.stop();
        result
    }

    async fn consume(
        &self,
        prepared: &mut PreparedWatch,
        lease: &mut RolloutLease,
    ) -> RolloutResult<WatchOutcome> {
        loop {
            let next = tokio::select! {
                biased;
                _ = lease.cancelled() => None,
                event = prepared.subscription.next() => Some(event),
            };
            let Some(event) = next else {
                prepared.batch.finish(WatchPhase::Cancelled);
                info!(workload = %prepared.target, "rollout watch cancelled");
                return Ok(WatchOutcome::Cancelled);
            };
            let Some(event) = event else {
                debug!(workload = %prepared.target, "rollout watch stream closed");
                return Ok(WatchOutcome::StreamClosed);
            };
            let event = event?;
            if event.workload.uid != prepared.uid {
                continue;
            }
            if event.kind == EventKind::Deleted {
                return Err(RolloutError::WorkloadNotFound(prepared.target.to_string()));
            }

            let status = event.workload.status;
            debug!(
                workload = %prepared.target,
                updated = status.updated_replicas,
                ready = status.ready_replicas,
                available = status.available_replicas,
                unavailable = status.unavailable_replicas,
                "rollout status event"
            );
            match prepared.batch.observe(&status) {
                Decision::Continue => {}
                Decision::Pause => {
                    self.set_paused(&prepared.target, true).await?;
                    info!(
                        workload = %prepared.target,
                        updated = status.updated_replicas,
                        "batch boundary reached, rollout paused"
                    );
                    return Ok(WatchOutcome::Paused);
                }
                Decision::Resume => {
                    self.set_paused(&prepared.target, false).await?;
                    info!(workload = %prepared.target, "rollout completed, resumed");
                    return Ok(WatchOutcome::Completed);
                }
                Decision::Converged => {
                    info!(workload = %prepared.target, "rollout converged");
                    return Ok(WatchOutcome::Completed);
                }
            }
        }
    }

    /// Apply the one-op pause/resume patch and audit it.
    pub async fn set_paused(&self, target: &WorkloadRef, paused: bool) -> RolloutResult<Workload> {
        apply_paused(self.platform.as_ref(), &self.auditor, target, paused).await
    }
}

pub(crate) async fn apply_paused(
    platform: &dyn Platform,
    auditor: &Auditor,
    target: &WorkloadRef,
    paused: bool,
) -> RolloutResult<Workload> {
    let ops = [PatchOp::set_paused(paused)];
    let workload = platform.patch_workload(target, &ops).await?;
    let action = if paused {
        AuditAction::Pause
    } else {
        AuditAction::Resume
    };
    auditor.record(target, action, &ops)?;
    debug!(workload = %target, paused, actor = auditor.actor(), "paused flag patched");
    Ok(workload)
}
