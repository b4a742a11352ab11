//! Background sync driver.
//!
//! A tokio task runs a cycle, waits for the configured interval (or a backed
//! off delay after a failure), and repeats until cancelled. Out-of-band
//! requests arrive on a bounded channel; requests that queue up while a
//! cycle runs are coalesced into the next one.

use crate::config::SyncConfig;
use crate::engine::EngineInner;
use crate::retry::{BackoffController, FailureClass};
use crate::store::LocalStore;
use crate::transport::RemoteTransport;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the trigger queue.
const TRIGGER_QUEUE_CAPACITY: usize = 16;

/// Shortest wait between two background cycles.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Why a cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The user asked for a sync.
    Manual,
    /// A local record changed (for example, a file watcher fired).
    LocalChange,
    /// The remote announced new changes.
    RemoteNotification,
    /// The regular interval elapsed.
    Interval,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::LocalChange => "local-change",
            SyncTrigger::RemoteNotification => "remote-notification",
            SyncTrigger::Interval => "interval",
        };
        f.write_str(name)
    }
}

/// Handle to a running live sync task.
pub(crate) struct LiveHandle {
    token: CancellationToken,
    triggers: mpsc::Sender<SyncTrigger>,
    task: JoinHandle<()>,
}

impl LiveHandle {
    /// Queues a trigger. A full queue already guarantees a pending cycle.
    pub(crate) fn request(&self, trigger: SyncTrigger) -> bool {
        match self.triggers.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(trigger = %trigger, "trigger coalesced into queued request");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the task and waits for it to exit.
    pub(crate) async fn stop(self) {
        self.token.cancel();
        drop(self.triggers);
        if let Err(e) = self.task.await {
            error!(error = %e, "live sync task failed");
        }
    }
}

/// Spawns the live sync loop on `runtime`.
pub(crate) fn spawn<T, S>(
    runtime: &Handle,
    inner: Arc<EngineInner<T, S>>,
    config: SyncConfig,
) -> LiveHandle
where
    T: RemoteTransport + 'static,
    S: LocalStore + 'static,
{
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
    let task = runtime.spawn(run(inner, config, token.clone(), rx));
    info!("live sync started");
    LiveHandle {
        token,
        triggers: tx,
        task,
    }
}

async fn run<T, S>(
    inner: Arc<EngineInner<T, S>>,
    config: SyncConfig,
    token: CancellationToken,
    mut triggers: mpsc::Receiver<SyncTrigger>,
) where
    T: RemoteTransport + 'static,
    S: LocalStore + 'static,
{
    let interval = config.sync_interval().max(MIN_INTERVAL);
    let mut backoff = BackoffController::new(config.retry.clone());
    // The first cycle runs immediately.
    let mut delay = Duration::ZERO;

    loop {
        let trigger = tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => SyncTrigger::Interval,
            Some(trigger) = triggers.recv() => trigger,
        };

        let mut coalesced = 0usize;
        while triggers.try_recv().is_ok() {
            coalesced += 1;
        }
        if token.is_cancelled() {
            break;
        }
        debug!(trigger = %trigger, coalesced, "running background cycle");

        let cycle = Arc::clone(&inner);
        let outcome = tokio::task::spawn_blocking(move || cycle.sync()).await;

        delay = match outcome {
            Ok(Ok(Some(_))) => {
                backoff.reset();
                interval
            }
            Ok(Ok(None)) => interval,
            Ok(Err(e)) => match FailureClass::of(&e) {
                FailureClass::Cancelled => break,
                FailureClass::AuthFailure => {
                    error!(error = %e, "authentication failed; stopping live sync");
                    break;
                }
                FailureClass::Retryable => {
                    let delay = backoff.next_delay(&e);
                    warn!(
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "background cycle failed; backing off"
                    );
                    delay
                }
                FailureClass::Conflict | FailureClass::Terminal => {
                    error!(error = %e, "background cycle failed");
                    backoff.cap()
                }
            },
            Err(e) => {
                error!(error = %e, "background cycle panicked");
                backoff.cap()
            }
        };
    }

    info!("live sync stopped");
}
