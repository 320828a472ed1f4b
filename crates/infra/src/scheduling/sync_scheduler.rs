//! Periodic sync scheduler
//!
//! Drives the sync executor on a fixed interval and accepts on-demand scoped
//! triggers through a bounded channel. Triggering returns as soon as the
//! request is enqueued; completion is observed through the watermarks.

use std::sync::Arc;
use std::time::Duration;

use dealflow_domain::{SyncConfig, SyncScope};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::integrations::crm::SyncExecutor;
use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

const TRIGGER_QUEUE_DEPTH: usize = 8;
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the sync scheduler
#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// Interval between periodic full syncs
    pub interval: Duration,
    /// Whether the periodic tick fires; on-demand triggers work either way
    pub enabled: bool,
}

impl From<&SyncConfig> for SyncSchedulerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_seconds.max(1)),
            enabled: config.enabled,
        }
    }
}

/// Scheduler for periodic and on-demand CRM syncs
pub struct SyncScheduler {
    executor: Arc<SyncExecutor>,
    config: SyncSchedulerConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
    /// Present while the loop is running; `None` otherwise
    trigger_tx: Arc<Mutex<Option<mpsc::Sender<SyncScope>>>>,
}

impl SyncScheduler {
    pub fn new(executor: Arc<SyncExecutor>, config: SyncSchedulerConfig) -> Self {
        Self {
            executor,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
            trigger_tx: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the background loop
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyRunning`] when the loop is active.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(
            interval_secs = self.config.interval.as_secs(),
            enabled = self.config.enabled,
            "starting sync scheduler"
        );

        // Fresh token and channel per start, so a stopped scheduler restarts
        self.cancellation_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE_DEPTH);
        *self.trigger_tx.lock().await = Some(tx);

        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::run_loop(executor, config, cancel, rx).await;
        });

        *self.task_handle.lock().await = Some(handle);

        Ok(())
    }

    /// Stop the background loop gracefully
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotRunning`] when no loop is active.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("stopping sync scheduler");

        self.cancellation_token.cancel();
        *self.trigger_tx.lock().await = None;

        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(JOIN_TIMEOUT, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: JOIN_TIMEOUT.as_secs() })?
                .map_err(|e| SchedulerError::TaskJoinFailed(e.to_string()))?;
        }

        info!("sync scheduler stopped");

        Ok(())
    }

    /// Whether the background loop is active
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Enqueue one scoped sync run and return immediately
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotRunning`] when the loop is stopped, or
    /// [`SchedulerError::TriggerFailed`] when the queue is full.
    pub async fn trigger_now(&self, scope: SyncScope) -> SchedulerResult<()> {
        let guard = self.trigger_tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            return Err(SchedulerError::NotRunning);
        };

        tx.try_send(scope).map_err(|e| SchedulerError::TriggerFailed(e.to_string()))
    }

    async fn run_loop(
        executor: Arc<SyncExecutor>,
        config: SyncSchedulerConfig,
        cancel: CancellationToken,
        mut trigger_rx: mpsc::Receiver<SyncScope>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("sync loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(config.interval), if config.enabled => {
                    debug!("periodic sync tick");
                    executor.run(SyncScope::All).await;
                }
                request = trigger_rx.recv() => {
                    match request {
                        Some(scope) => {
                            debug!(%scope, "triggered sync");
                            executor.run(scope).await;
                        }
                        // All senders gone means stop() already ran
                        None => break,
                    }
                }
            }
        }
    }
}

/// Ensure the loop is cancelled when the scheduler is dropped
impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("sync scheduler dropped while running; cancelling");
            self.cancellation_token.cancel();
        }
    }
}
