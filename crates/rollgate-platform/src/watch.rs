//! Cancellable workload subscriptions.
//!
//! A [`Subscription`] owns the task that pumps platform events into a
//! bounded channel. Stopping it (explicitly or by dropping it) closes the
//! channel and aborts the pump, which tears down the underlying stream.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PlatformResult;
use crate::types::WorkloadEvent;

/// Buffered events per subscription before the pump applies backpressure.
pub const SUBSCRIPTION_BUFFER: usize = 64;

type StopHook = Box<dyn FnOnce() + Send>;

pub struct Subscription {
    events: mpsc::Receiver<PlatformResult<WorkloadEvent>>,
    pump: Option<JoinHandle<()>>,
    on_stop: Option<StopHook>,
    stopped: bool,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<PlatformResult<WorkloadEvent>>, pump: JoinHandle<()>) -> Self {
        Self {
            events,
            pump: Some(pump),
            on_stop: None,
            stopped: false,
        }
    }

    /// Run `hook` exactly once when the subscription stops.
    pub fn with_stop_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(hook));
        self
    }

    /// Next event in arrival order. `None` once the platform closed the
    /// stream or the subscription was stopped.
    pub async fn next(&mut self) -> Option<PlatformResult<WorkloadEvent>> {
        if self.stopped {
            return None;
        }
        self.events.recv().await
    }

    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.events.close();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(hook) = self.on_stop.take() {
            hook();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stopped", &self.stopped)
            .finish()
    }
}
