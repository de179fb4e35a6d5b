//! Background unack reclaimer (spec §4.6, §5, §9).
//!
//! The distilled source starts this task eagerly at construction with no
//! shutdown hook. Per the redesign flag in SPEC_FULL.md §11, this crate
//! instead exposes an explicit [`spawn_reclaimer`] the caller invokes when
//! ready, returning a [`ReclaimerHandle`] whose `shutdown` cancels the task
//! and awaits its exit, so tests and embedding processes can deterministically
//! quiesce it rather than leaking a detached task for the life of the process.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::PgQueueEngine;

/// Handle to a running reclaimer task.
pub struct ReclaimerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Start the periodic sweep over every queue (spec §4.6 `processAllUnacks`),
/// ticking at `engine.config().reclaim_interval`.
///
/// Each tick's fault, if any, is logged and swallowed: per spec §7, "the
/// reclaimer logs and continues on the next tick" rather than aborting the
/// task on a single bad sweep.
pub fn spawn_reclaimer(engine: Arc<PgQueueEngine>) -> ReclaimerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let interval = engine.config().reclaim_interval;

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match workqueue_core::store::QueueStore::process_all_unacks(engine.as_ref()).await {
                        Ok(0) => tracing::trace!("reclaimer sweep: nothing expired"),
                        Ok(recycled) => tracing::info!(recycled, "reclaimer sweep: recycled expired leases"),
                        Err(err) => tracing::warn!(error = %err, "reclaimer sweep failed, continuing on next tick"),
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        tracing::debug!("reclaimer: shutdown requested");
                        break;
                    }
                }
            }
        }
    });

    ReclaimerHandle {
        stop: stop_tx,
        task,
    }
}
