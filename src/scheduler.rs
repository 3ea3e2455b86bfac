//! Recurring background tasks with explicit cancellation.
//!
//! A run is awaited to completion before the next tick is considered, so a task never
//! overlaps itself. Ticks that fall due while a run is in flight are skipped. Cancelling
//! stops rescheduling; it does not abort a run that is already in progress.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a spawned recurring task. Dropping it cancels the task.
pub(crate) struct RecurringTask {
    name: &'static str,
    cancel_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl RecurringTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop rescheduling and wait for any in-flight run to finish.
    pub async fn cancel(mut self) {
        let _ = self.cancel_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("[scheduler] {} ended abnormally: {e}", self.name);
            }
        }
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// Run `task` immediately and then every `every` until cancelled.
pub(crate) fn spawn_recurring<F, Fut>(name: &'static str, every: Duration, mut task: F) -> RecurringTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::debug!("[scheduler] {name} every {}", humantime::format_duration(every));
        loop {
            tokio::select! {
                biased;
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    task().await;
                }
            }
        }
        log::debug!("[scheduler] {name} cancelled");
    });
    RecurringTask {
        name,
        cancel_tx,
        handle: Some(handle),
    }
}
