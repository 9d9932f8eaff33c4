//! Cancellable interval tasks owned by a cache or monitor instance

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to a periodic background task
///
/// The task only holds a `Weak` reference to its state, so it ends on its own
/// once the owner is gone. `stop()` and `Drop` abort it immediately.
#[derive(Debug)]
pub(crate) struct BackgroundTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `tick` every `period` on the current tokio runtime
    ///
    /// Returns `None` when called outside a runtime; the owner then simply
    /// has no periodic maintenance and callers can run it by hand.
    pub(crate) fn spawn_periodic<S, F, Fut>(
        name: &'static str,
        period: Duration,
        state: Weak<S>,
        tick: F,
    ) -> Option<Self>
    where
        S: Send + Sync + 'static,
        F: Fn(Arc<S>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime, {} task not started", name);
                return None;
            }
        };

        info!("Starting {} task (interval: {:?})", name, period);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    debug!("{} task owner dropped, exiting", name);
                    break;
                };
                tick(state).await;
            }
        });

        Some(Self {
            name,
            handle: Some(handle),
        })
    }

    /// Abort the task; idempotent
    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Stopped {} task", self.name);
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}
