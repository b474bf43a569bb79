//! Rollout controller: the public staged-rollout operations.
//!
//! Each operation validates before touching the platform, serializes
//! watchers per workload through [`RolloutLocks`], and opens the watcher's
//! subscription before issuing the patch that starts replicas moving.

use std::sync::Arc;
use std::time::Duration;

use rollgate_platform::{PatchOp, Platform, Workload, WorkloadRef};
use rollgate_state::AuditAction;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::audit::{AuditSink, Auditor};
use crate::error::{RolloutError, RolloutResult};
use crate::lock::{RolloutLease, RolloutLocks};
use crate::status::{RolloutSnapshot, read_workload, snapshot};
use crate::step::validate_step;
use crate::watcher::{PreparedWatch, RolloutWatcher, WatchOutcome, apply_paused};

/// Default deadline for one watcher invocation.
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
pub struct RolloutSettings {
    pub watch_timeout: Duration,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            watch_timeout: DEFAULT_WATCH_TIMEOUT,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolloutOptions {
    /// Block until the watcher decides. `None` uses the operation's
    /// default: image and all-resume return at once, step-resume waits.
    pub wait_for_decision: Option<bool>,
}

impl RolloutOptions {
    pub fn wait(wait: bool) -> Self {
        Self {
            wait_for_decision: Some(wait),
        }
    }
}

type DecisionRx = oneshot::Receiver<RolloutResult<WatchOutcome>>;

/// Staged rollout operations against one cluster.
#[derive(Clone)]
pub struct RolloutController {
    cluster: String,
    platform: Arc<dyn Platform>,
    audit: Arc<dyn AuditSink>,
    locks: RolloutLocks,
    settings: RolloutSettings,
}

impl RolloutController {
    pub fn new(
        cluster: &str,
        platform: Arc<dyn Platform>,
        audit: Arc<dyn AuditSink>,
        locks: RolloutLocks,
        settings: RolloutSettings,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            platform,
            audit,
            locks,
            settings,
        }
    }

    fn auditor(&self, actor: &str) -> Auditor {
        Auditor::new(self.audit.clone(), &self.cluster, actor)
    }

    fn watcher(&self, actor: &str) -> RolloutWatcher {
        RolloutWatcher::new(
            self.platform.clone(),
            self.auditor(actor),
            self.settings.watch_timeout,
        )
    }

    fn lock_key(&self, target: &WorkloadRef) -> String {
        RolloutLocks::key(&self.cluster, target)
    }

    async fn read_supported(&self, target: &WorkloadRef) -> RolloutResult<Workload> {
        ensure_supported(target)?;
        let workload = read_workload(self.platform.as_ref(), target).await?;
        if workload.strategy.is_none() {
            return Err(RolloutError::WorkloadKindUnsupported(target.to_string()));
        }
        Ok(workload)
    }

    /// Start a staged image rollout with `step` replicas per batch.
    ///
    /// Clears `paused`, subscribes, then applies `image_patch` together with
    /// `maxUnavailable = step`. The watcher pauses at the first batch
    /// boundary in the background; on failure or timeout it pauses the
    /// workload to stop further batches. If the rollout cannot be started
    /// the workload's previous `paused` value is put back.
    pub async fn patch_image(
        &self,
        target: &WorkloadRef,
        step: &str,
        image_patch: Vec<PatchOp>,
        actor: &str,
        opts: RolloutOptions,
    ) -> RolloutResult<RolloutSnapshot> {
        let workload = self.read_supported(target).await?;
        let step = validate_step(step, workload.desired_replicas)?;
        let max_unavailable = step.to_int_or_percent();

        let key = self.lock_key(target);
        let lease = self.locks.try_acquire(&key)?;
        let watcher = self.watcher(actor);
        watcher.set_paused(target, false).await?;
        let prepared = match watcher.prepare(target, Some(&max_unavailable)).await {
            Ok(prepared) => prepared,
            Err(e) => {
                drop(lease);
                self.restore_paused(&watcher, target, workload.paused).await;
                return Err(e);
            }
        };
        let decision = self.spawn_watch(watcher.clone(), prepared, lease, true);

        let mut ops = image_patch;
        ops.push(PatchOp::set_max_unavailable(&max_unavailable));
        if let Err(e) = self.platform.patch_workload(target, &ops).await {
            self.locks.cancel_and_wait(&key).await;
            self.restore_paused(&watcher, target, workload.paused).await;
            return Err(e.into());
        }
        self.auditor(actor)
            .record(target, AuditAction::PatchImage, &ops)?;
        info!(workload = %target, step = %max_unavailable, actor, "image rollout started");

        if opts.wait_for_decision.unwrap_or(false) {
            self.await_decision(target, decision).await?;
        }
        snapshot(self.platform.as_ref(), target).await
    }

    /// Put back a `paused = true` that an aborted image rollout cleared.
    async fn restore_paused(
        &self,
        watcher: &RolloutWatcher,
        target: &WorkloadRef,
        was_paused: bool,
    ) {
        if !was_paused {
            return;
        }
        match watcher.set_paused(target, true).await {
            Ok(_) => warn!(workload = %target, "image rollout aborted, paused flag restored"),
            Err(e) => error!(workload = %target, error = %e, "failed to restore paused flag"),
        }
    }

    /// Release the next batch and, by default, wait for the watcher to
    /// pause at the following boundary or finish the rollout.
    pub async fn patch_step_resume(
        &self,
        target: &WorkloadRef,
        actor: &str,
        opts: RolloutOptions,
    ) -> RolloutResult<RolloutSnapshot> {
        let workload = self.read_supported(target).await?;
        if workload.status.updated_replicas == workload.desired_replicas {
            info!(workload = %target, "rollout already complete, nothing to resume");
            return Ok(RolloutSnapshot::counts(
                workload.desired_replicas,
                workload.status.updated_replicas,
            ));
        }

        let lease = self.locks.try_acquire(&self.lock_key(target))?;
        let watcher = self.watcher(actor);
        let prepared = watcher.prepare(target, None).await?;
        let decision = self.spawn_watch(watcher.clone(), prepared, lease, false);
        if let Err(e) = watcher.set_paused(target, false).await {
            self.locks.cancel(&self.lock_key(target));
            return Err(e);
        }

        if opts.wait_for_decision.unwrap_or(true) {
            self.await_decision(target, decision).await?;
        }
        snapshot(self.platform.as_ref(), target).await
    }

    /// Resume and let the rollout run to the end. Any in-flight batch
    /// watcher for the workload is cancelled first.
    pub async fn patch_all_resume(
        &self,
        target: &WorkloadRef,
        actor: &str,
        opts: RolloutOptions,
    ) -> RolloutResult<RolloutSnapshot> {
        self.read_supported(target).await?;
        let key = self.lock_key(target);
        self.locks.cancel_and_wait(&key).await;

        if !opts.wait_for_decision.unwrap_or(false) {
            apply_paused(self.platform.as_ref(), &self.auditor(actor), target, false).await?;
            info!(workload = %target, actor, "rollout resumed to completion");
            return snapshot(self.platform.as_ref(), target).await;
        }

        let lease = self.locks.try_acquire(&key)?;
        let watcher = self.watcher(actor);
        let prepared = watcher.prepare_convergence(target).await?;
        let decision = self.spawn_watch(watcher.clone(), prepared, lease, false);
        if let Err(e) = watcher.set_paused(target, false).await {
            self.locks.cancel(&key);
            return Err(e);
        }
        self.await_decision(target, decision).await?;
        snapshot(self.platform.as_ref(), target).await
    }

    /// Pause the rollout. Any in-flight watcher is cancelled first.
    pub async fn patch_pause(
        &self,
        target: &WorkloadRef,
        actor: &str,
    ) -> RolloutResult<RolloutSnapshot> {
        self.read_supported(target).await?;
        self.locks.cancel_and_wait(&self.lock_key(target)).await;
        apply_paused(self.platform.as_ref(), &self.auditor(actor), target, true).await?;
        let workload = read_workload(self.platform.as_ref(), target).await?;
        info!(workload = %target, actor, "rollout paused");
        Ok(RolloutSnapshot::counts(
            workload.status.replicas,
            workload.status.updated_replicas,
        ))
    }

    /// Current counts and the active generation's pod IPs.
    pub async fn watch_pod_ip(&self, target: &WorkloadRef) -> RolloutResult<RolloutSnapshot> {
        ensure_supported(target)?;
        snapshot(self.platform.as_ref(), target).await
    }

    /// Whether a watcher currently drives `target`.
    pub fn in_progress(&self, target: &WorkloadRef) -> bool {
        self.locks.is_held(&self.lock_key(target))
    }

    fn spawn_watch(
        &self,
        watcher: RolloutWatcher,
        prepared: PreparedWatch,
        mut lease: RolloutLease,
        pause_on_error: bool,
    ) -> DecisionRx {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let target = prepared.target().clone();
            let result = watcher.run(prepared, &mut lease).await;
            let pause_now = match &result {
                Ok(WatchOutcome::TimedOut) => true,
                Err(e) => {
                    error!(workload = %target, error = %e, "rollout watcher failed");
                    pause_on_error
                }
                Ok(outcome) => {
                    info!(workload = %target, outcome = ?outcome, "rollout watcher finished");
                    false
                }
            };
            if pause_now {
                warn!(workload = %target, "pausing rollout after unsupervised watcher exit");
                if let Err(e) = watcher.set_paused(&target, true).await {
                    error!(workload = %target, error = %e, "fallback pause failed");
                }
            }
            drop(lease);
            // The caller may not be waiting.
            let _ = tx.send(result);
        });
        rx
    }

    async fn await_decision(&self, target: &WorkloadRef, decision: DecisionRx) -> RolloutResult<WatchOutcome> {
        match decision.await {
            Ok(Ok(WatchOutcome::TimedOut)) => Err(RolloutError::TimedOut {
                workload: target.to_string(),
                after: self.settings.watch_timeout,
            }),
            Ok(result) => result,
            Err(_) => Err(RolloutError::WatcherLost(target.to_string())),
        }
    }
}

fn ensure_supported(target: &WorkloadRef) -> RolloutResult<()> {
    if target.kind.supports_step_rollout() {
        Ok(())
    } else {
        Err(RolloutError::WorkloadKindUnsupported(target.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{generation, pod, rolling, web_deployment};
    use rollgate_platform::{
        ControllerKind, IntOrPercent, MemoryPlatform, PAUSED_PATH, PlatformError, RollingUpdate,
        Workload,
    };
    use rollgate_state::{NewAuditRecord, StateStore};
    use serde_json::Value;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        platform: MemoryPlatform,
        store: StateStore,
        controller: RolloutController,
        target: WorkloadRef,
    }

    fn fixture_with(workload: Workload, settings: RolloutSettings) -> Fixture {
        let platform = MemoryPlatform::new();
        let workload = platform.insert_workload(workload);
        platform.add_generation(generation("rs-1", &workload.uid, workload.desired_replicas, 100));
        platform.add_pod(pod("web-1", "rs-1", Some("10.0.0.1")));
        let store = StateStore::open_in_memory().unwrap();
        let controller = RolloutController::new(
            "test",
            Arc::new(platform.clone()),
            Arc::new(store.clone()),
            RolloutLocks::new(),
            settings,
        );
        Fixture {
            platform,
            store,
            controller,
            target: workload.reference(),
        }
    }

    fn fixture(workload: Workload) -> Fixture {
        fixture_with(workload, RolloutSettings::default())
    }

    /// A deployment paused after its first batch.
    fn paused_mid_rollout(desired: u32, updated: u32, max_unavailable: u32) -> Workload {
        let mut workload = web_deployment(desired);
        workload.paused = true;
        workload.strategy = Some(RollingUpdate {
            max_unavailable: IntOrPercent::Int(max_unavailable),
            max_surge: IntOrPercent::Int(0),
        });
        workload.status = rolling(desired, updated, 0);
        workload
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn image_patch(image: &str) -> Vec<PatchOp> {
        vec![PatchOp::replace(
            "/spec/template/spec/containers/0/image",
            Value::from(image),
        )]
    }

    fn audit_actions(store: &StateStore) -> Vec<AuditAction> {
        let mut records = store.list_audit(100).unwrap();
        records.reverse();
        records.into_iter().map(|r| r.entry.action).collect()
    }

    #[tokio::test]
    async fn step_resume_short_circuits_when_rollout_complete() {
        let fx = fixture(web_deployment(10));
        let snap = fx
            .controller
            .patch_step_resume(&fx.target, "alice", RolloutOptions::default())
            .await
            .unwrap();
        assert_eq!(snap, RolloutSnapshot::counts(10, 10));
        assert!(fx.platform.patches().is_empty());
        assert_eq!(fx.platform.active_watchers(), 0);
        assert!(audit_actions(&fx.store).is_empty());
    }

    #[tokio::test]
    async fn invalid_steps_leave_workload_untouched() {
        let fx = fixture(web_deployment(10));
        for (step, check) in [
            ("150%", "range"),
            ("0", "range"),
            ("", "missing"),
            ("two", "invalid"),
        ] {
            let err = fx
                .controller
                .patch_image(&fx.target, step, image_patch("web:v2"), "alice", RolloutOptions::default())
                .await
                .unwrap_err();
            match check {
                "range" => assert!(matches!(err, RolloutError::StepOutOfRange { .. }), "{step}"),
                "missing" => assert!(matches!(err, RolloutError::MissingStep)),
                _ => assert!(matches!(err, RolloutError::InvalidStep(_))),
            }
        }
        assert!(fx.platform.patches().is_empty());
        assert!(!fx.controller.in_progress(&fx.target));
    }

    #[tokio::test]
    async fn patch_image_pauses_at_first_batch_boundary() {
        let fx = fixture(web_deployment(10));
        let snap = fx
            .controller
            .patch_image(&fx.target, "2", image_patch("web:v2"), "alice", RolloutOptions::default())
            .await
            .unwrap();
        assert_eq!(snap.replicas, 10);
        assert_eq!(snap.pod_ip, vec!["10.0.0.1"]);
        assert_eq!(snap.group_completed, Some(1));

        let patches = fx.platform.patches();
        assert_eq!(patches[0].ops, vec![PatchOp::set_paused(false)]);
        assert_eq!(
            patches[1].ops.last(),
            Some(&PatchOp::set_max_unavailable(&IntOrPercent::Int(2)))
        );
        let workload = fx.platform.workload(&fx.target).unwrap();
        assert_eq!(workload.containers[0].image, "web:v2");
        assert!(fx.controller.in_progress(&fx.target));

        // checkpoint 0, maxUnavailable 2, maxSurge 0: pause when updated hits 3.
        for updated in [0, 1, 2] {
            fx.platform.set_status(&fx.target, rolling(10, updated, 2)).unwrap();
        }
        tokio::task::yield_now().await;
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);

        fx.platform.set_status(&fx.target, rolling(10, 3, 2)).unwrap();
        wait_until("watcher release", || !fx.controller.in_progress(&fx.target)).await;
        assert!(fx.platform.workload(&fx.target).unwrap().paused);
        assert_eq!(fx.platform.active_watchers(), 0);
        assert_eq!(
            audit_actions(&fx.store),
            vec![AuditAction::Resume, AuditAction::PatchImage, AuditAction::Pause]
        );
    }

    #[tokio::test]
    async fn step_resume_blocks_until_next_boundary() {
        let fx = fixture(paused_mid_rollout(10, 3, 2));
        let controller = fx.controller.clone();
        let target = fx.target.clone();
        let call = tokio::spawn(async move {
            controller
                .patch_step_resume(&target, "bob", RolloutOptions::default())
                .await
        });

        tokio::time::timeout(WAIT, fx.platform.wait_for_watchers(1))
            .await
            .unwrap();
        wait_until("resume patch", || fx.platform.patches().len() == 1).await;
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);

        // checkpoint 3: boundary is 3 + 2 + 0 + 1 = 6.
        for updated in [4, 5, 6] {
            fx.platform.set_status(&fx.target, rolling(10, updated, 2)).unwrap();
        }
        let snap = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap();
        assert_eq!(snap.updated_replicas, 6);
        assert_eq!(snap.group_completed, None);
        assert!(fx.platform.workload(&fx.target).unwrap().paused);
    }

    #[tokio::test]
    async fn step_resume_finishes_rollout() {
        let fx = fixture(paused_mid_rollout(4, 3, 2));
        let controller = fx.controller.clone();
        let target = fx.target.clone();
        let call = tokio::spawn(async move {
            controller
                .patch_step_resume(&target, "bob", RolloutOptions::default())
                .await
        });
        tokio::time::timeout(WAIT, fx.platform.wait_for_watchers(1))
            .await
            .unwrap();
        fx.platform.set_status(&fx.target, rolling(4, 4, 0)).unwrap();

        let snap = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap();
        assert_eq!(snap.updated_replicas, 4);
        assert_eq!(snap.group_completed, Some(1));
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);
        assert_eq!(
            audit_actions(&fx.store),
            vec![AuditAction::Resume, AuditAction::Resume]
        );
    }

    #[tokio::test]
    async fn second_rollout_on_same_workload_is_rejected() {
        let fx = fixture(paused_mid_rollout(10, 3, 2));
        let controller = fx.controller.clone();
        let target = fx.target.clone();
        let first = tokio::spawn(async move {
            controller
                .patch_step_resume(&target, "bob", RolloutOptions::default())
                .await
        });
        tokio::time::timeout(WAIT, fx.platform.wait_for_watchers(1))
            .await
            .unwrap();

        let err = fx
            .controller
            .patch_step_resume(&fx.target, "carol", RolloutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::RolloutInProgress(_)));
        assert_eq!(fx.platform.active_watchers(), 1);

        fx.platform.set_status(&fx.target, rolling(10, 6, 2)).unwrap();
        tokio::time::timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn pause_cancels_in_flight_watcher() {
        let fx = fixture(paused_mid_rollout(10, 3, 2));
        let controller = fx.controller.clone();
        let target = fx.target.clone();
        let call = tokio::spawn(async move {
            controller
                .patch_step_resume(&target, "bob", RolloutOptions::default())
                .await
        });
        tokio::time::timeout(WAIT, fx.platform.wait_for_watchers(1))
            .await
            .unwrap();
        wait_until("resume patch", || fx.platform.patches().len() == 1).await;

        let snap = fx.controller.patch_pause(&fx.target, "carol").await.unwrap();
        assert_eq!(snap, RolloutSnapshot::counts(10, 3));
        assert!(fx.platform.workload(&fx.target).unwrap().paused);
        assert!(!fx.controller.in_progress(&fx.target));

        // The waiting caller gets the current snapshot, not an error.
        let snap = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap();
        assert_eq!(snap.updated_replicas, 3);
        assert_eq!(fx.platform.active_watchers(), 0);
    }

    #[tokio::test]
    async fn step_resume_timeout_pauses_and_reports() {
        let fx = fixture_with(
            paused_mid_rollout(10, 3, 2),
            RolloutSettings {
                watch_timeout: Duration::from_millis(50),
            },
        );
        let err = fx
            .controller
            .patch_step_resume(&fx.target, "bob", RolloutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::TimedOut { .. }));
        assert!(fx.platform.workload(&fx.target).unwrap().paused);
        assert!(!fx.controller.in_progress(&fx.target));
        assert_eq!(fx.platform.active_watchers(), 0);
    }

    #[tokio::test]
    async fn image_rollout_timeout_pauses_in_background() {
        let fx = fixture_with(
            web_deployment(10),
            RolloutSettings {
                watch_timeout: Duration::from_millis(50),
            },
        );
        fx.controller
            .patch_image(&fx.target, "20%", image_patch("web:v2"), "alice", RolloutOptions::default())
            .await
            .unwrap();
        wait_until("fallback pause", || {
            fx.platform.workload(&fx.target).is_some_and(|w| w.paused)
        })
        .await;
        wait_until("watcher release", || !fx.controller.in_progress(&fx.target)).await;
    }

    #[tokio::test]
    async fn closed_stream_returns_without_error() {
        let fx = fixture(paused_mid_rollout(10, 3, 2));
        let controller = fx.controller.clone();
        let target = fx.target.clone();
        let call = tokio::spawn(async move {
            controller
                .patch_step_resume(&target, "bob", RolloutOptions::default())
                .await
        });
        tokio::time::timeout(WAIT, fx.platform.wait_for_watchers(1))
            .await
            .unwrap();
        wait_until("resume patch", || fx.platform.patches().len() == 1).await;
        fx.platform.close_watches();

        let snap = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap();
        assert_eq!(snap.updated_replicas, 3);
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);
    }

    #[tokio::test]
    async fn all_resume_returns_immediately_by_default() {
        let fx = fixture(paused_mid_rollout(10, 3, 2));
        let snap = fx
            .controller
            .patch_all_resume(&fx.target, "dave", RolloutOptions::default())
            .await
            .unwrap();
        assert_eq!(snap.updated_replicas, 3);
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);
        assert_eq!(fx.platform.active_watchers(), 0);
    }

    #[tokio::test]
    async fn all_resume_can_wait_for_convergence() {
        let fx = fixture(paused_mid_rollout(10, 3, 2));
        let controller = fx.controller.clone();
        let target = fx.target.clone();
        let call = tokio::spawn(async move {
            controller
                .patch_all_resume(&target, "dave", RolloutOptions::wait(true))
                .await
        });
        tokio::time::timeout(WAIT, fx.platform.wait_for_watchers(1))
            .await
            .unwrap();
        // Past the batch boundary without pausing.
        for updated in [6, 8, 10] {
            fx.platform.set_status(&fx.target, rolling(10, updated, 1)).unwrap();
        }
        fx.platform.set_status(&fx.target, rolling(10, 10, 0)).unwrap();

        let snap = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap();
        assert_eq!(snap.updated_replicas, 10);
        assert_eq!(snap.group_completed, Some(1));
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);
    }

    #[tokio::test]
    async fn failed_pause_patch_keeps_flag() {
        let fx = fixture(web_deployment(3));
        fx.platform.fail_patch_path(PAUSED_PATH);
        let err = fx.controller.patch_pause(&fx.target, "eve").await.unwrap_err();
        assert!(matches!(err, RolloutError::Platform(_)));
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);
        assert!(audit_actions(&fx.store).is_empty());
    }

    const IMAGE_PATH: &str = "/spec/template/spec/containers/0/image";

    #[tokio::test]
    async fn failed_image_patch_restores_paused_flag() {
        let fx = fixture(paused_mid_rollout(10, 3, 2));
        fx.platform.fail_patch_path(IMAGE_PATH);
        let err = fx
            .controller
            .patch_image(&fx.target, "2", image_patch("web:v3"), "alice", RolloutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Platform(_)));

        let workload = fx.platform.workload(&fx.target).unwrap();
        assert!(workload.paused);
        assert_eq!(workload.containers[0].image, "web:v1");
        assert!(!fx.controller.in_progress(&fx.target));
        assert_eq!(fx.platform.active_watchers(), 0);
        assert_eq!(
            audit_actions(&fx.store),
            vec![AuditAction::Resume, AuditAction::Pause]
        );
    }

    #[tokio::test]
    async fn failed_image_patch_leaves_running_workload_unpaused() {
        let fx = fixture(web_deployment(10));
        fx.platform.fail_patch_path(IMAGE_PATH);
        let err = fx
            .controller
            .patch_image(&fx.target, "2", image_patch("web:v2"), "alice", RolloutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Platform(_)));
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);
        assert!(!fx.controller.in_progress(&fx.target));
        assert_eq!(audit_actions(&fx.store), vec![AuditAction::Resume]);
    }

    #[tokio::test]
    async fn image_rollout_watch_error_pauses_in_background() {
        let fx = fixture(web_deployment(10));
        fx.controller
            .patch_image(&fx.target, "2", image_patch("web:v2"), "alice", RolloutOptions::default())
            .await
            .unwrap();
        assert!(fx.controller.in_progress(&fx.target));

        fx.platform.fail_watches(500, "watch stream reset");
        wait_until("watcher release", || !fx.controller.in_progress(&fx.target)).await;
        assert!(fx.platform.workload(&fx.target).unwrap().paused);
        assert_eq!(fx.platform.active_watchers(), 0);
        assert_eq!(
            audit_actions(&fx.store),
            vec![AuditAction::Resume, AuditAction::PatchImage, AuditAction::Pause]
        );
    }

    #[tokio::test]
    async fn step_resume_watch_error_is_returned_without_pausing() {
        let fx = fixture(paused_mid_rollout(10, 3, 2));
        let controller = fx.controller.clone();
        let target = fx.target.clone();
        let call = tokio::spawn(async move {
            controller
                .patch_step_resume(&target, "bob", RolloutOptions::default())
                .await
        });
        tokio::time::timeout(WAIT, fx.platform.wait_for_watchers(1))
            .await
            .unwrap();
        wait_until("resume patch", || fx.platform.patches().len() == 1).await;
        fx.platform.fail_watches(500, "watch stream reset");

        let err = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(
            err,
            RolloutError::Platform(PlatformError::Api { status: 500, .. })
        ));
        assert!(!fx.platform.workload(&fx.target).unwrap().paused);
        assert!(!fx.controller.in_progress(&fx.target));
        assert_eq!(audit_actions(&fx.store), vec![AuditAction::Resume]);
    }

    struct RejectingAudit;

    impl AuditSink for RejectingAudit {
        fn record(&self, _entry: &NewAuditRecord) -> RolloutResult<()> {
            Err(RolloutError::Audit("audit store unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn audit_failure_fails_the_operation() {
        let platform = MemoryPlatform::new();
        let target = platform.insert_workload(web_deployment(3)).reference();
        let controller = RolloutController::new(
            "test",
            Arc::new(platform.clone()),
            Arc::new(RejectingAudit),
            RolloutLocks::new(),
            RolloutSettings::default(),
        );
        let err = controller.patch_pause(&target, "eve").await.unwrap_err();
        assert!(matches!(err, RolloutError::Audit(_)));
    }

    #[tokio::test]
    async fn unsupported_kinds_are_rejected() {
        let fx = fixture(web_deployment(3));
        let ds = WorkloadRef::new(ControllerKind::DaemonSet, "prod", "agent");
        let opts = RolloutOptions::default();
        assert!(matches!(
            fx.controller.watch_pod_ip(&ds).await,
            Err(RolloutError::WorkloadKindUnsupported(_))
        ));
        assert!(matches!(
            fx.controller.patch_pause(&ds, "x").await,
            Err(RolloutError::WorkloadKindUnsupported(_))
        ));
        assert!(matches!(
            fx.controller.patch_all_resume(&ds, "x", opts).await,
            Err(RolloutError::WorkloadKindUnsupported(_))
        ));
        assert!(matches!(
            fx.controller.patch_image(&ds, "1", Vec::new(), "x", opts).await,
            Err(RolloutError::WorkloadKindUnsupported(_))
        ));
        assert!(fx.platform.patches().is_empty());
    }

    #[tokio::test]
    async fn recreate_deployment_is_rejected() {
        let mut workload = web_deployment(3);
        workload.strategy = None;
        let fx = fixture(workload);
        let err = fx
            .controller
            .patch_step_resume(&fx.target, "x", RolloutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::WorkloadKindUnsupported(_)));
    }

    #[tokio::test]
    async fn watch_pod_ip_snapshot() {
        let fx = fixture(web_deployment(3));
        let snap = fx.controller.watch_pod_ip(&fx.target).await.unwrap();
        assert_eq!(snap.replicas, 3);
        assert_eq!(snap.pod_ip, vec!["10.0.0.1"]);
        assert_eq!(snap.group_completed, Some(1));
    }
}
