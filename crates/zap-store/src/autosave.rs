use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::{FlushReport, MirrorStore};
use crate::{StoreError, StoreResult};

/// Handle for the periodic full-store flush task.
pub struct AutosaveHandle {
    interval: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<FlushReport>>,
}

impl AutosaveHandle {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the loop and returns the report of its final flush.
    pub async fn shutdown(&mut self) -> FlushReport {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|error| {
                warn!(error = %error, "autosave task ended abnormally");
                FlushReport::default()
            }),
            None => FlushReport::default(),
        }
    }
}

/// Spawns a task that flushes every dirty collection once per `interval`.
pub fn start_autosave(store: Arc<MirrorStore>, interval: Duration) -> StoreResult<AutosaveHandle> {
    if interval.is_zero() {
        return Err(StoreError::InvalidConfig(
            "autosave interval must be greater than zero".to_string(),
        ));
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|error| {
        StoreError::InvalidConfig(format!("autosave requires an active Tokio runtime: {error}"))
    })?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = runtime.spawn(run_autosave_loop(store, interval, shutdown_rx));
    info!(interval_ms = interval.as_millis() as u64, "autosave started");
    Ok(AutosaveHandle {
        interval,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_autosave_loop(
    store: Arc<MirrorStore>,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> FlushReport {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                let report = store.flush_dirty().await;
                if !report.failed.is_empty() {
                    warn!(failed = ?report.failed, "autosave left collections dirty");
                } else if !report.flushed.is_empty() {
                    debug!(flushed = ?report.flushed, "autosave cycle complete");
                }
            }
        }
    }

    let report = store.flush_dirty().await;
    info!(
        flushed = report.flushed.len(),
        failed = report.failed.len(),
        "autosave stopped"
    );
    report
}
