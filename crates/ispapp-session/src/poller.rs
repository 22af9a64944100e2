use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PollingConfig;
use crate::metrics;
use crate::session::SessionManager;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollerStats {
    pub ticks: u64,
    pub checks: u64,
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    checks: AtomicU64,
    skipped: AtomicU64,
}

/// Periodic connectivity checks for one session.
pub struct StatusPoller;

impl StatusPoller {
    /// Start polling. The first check fires one interval from now.
    pub fn spawn(session: Arc<SessionManager>, config: PollingConfig) -> PollerHandle {
        let cancel = CancellationToken::new();
        let (config_tx, config_rx) = watch::channel(config);
        let counters = Arc::new(Counters::default());
        let task = tokio::spawn(run(
            session,
            config_rx,
            cancel.clone(),
            Arc::clone(&counters),
        ));
        tracing::debug!(
            target: "ispapp::poller",
            interval_secs = config.interval_secs(),
            "status poller started"
        );
        PollerHandle {
            cancel,
            config_tx,
            counters,
            task: Some(task),
        }
    }
}

/// Control surface of a running poller. Dropping it stops future ticks.
pub struct PollerHandle {
    cancel: CancellationToken,
    config_tx: watch::Sender<PollingConfig>,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Reschedule: the next tick fires one new interval from now. Setting
    /// the interval already in effect changes nothing.
    pub fn set_config(&self, config: PollingConfig) {
        self.config_tx.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            *current = config;
            true
        });
    }

    pub fn config(&self) -> PollingConfig {
        *self.config_tx.borrow()
    }

    /// Stop scheduling ticks. A check already dispatched still runs to
    /// completion, but its result is not applied.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            ticks: self.counters.ticks.load(Ordering::SeqCst),
            checks: self.counters.checks.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::SeqCst),
        }
    }

    /// Cancel and wait for the scheduling loop to exit.
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(target: "ispapp::poller", error = %err, "poller task failed");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    session: Arc<SessionManager>,
    mut config_rx: watch::Receiver<PollingConfig>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut interval = config_rx.borrow_and_update().interval();
    let mut next_tick = Instant::now() + interval;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let updated = config_rx.borrow_and_update().interval();
                if updated == interval {
                    continue;
                }
                interval = updated;
                next_tick = Instant::now() + interval;
                tracing::debug!(
                    target: "ispapp::poller",
                    interval_secs = interval.as_secs(),
                    "poll interval changed; rescheduled next check"
                );
            }
            _ = tokio::time::sleep_until(next_tick) => {
                next_tick = Instant::now() + interval;
                counters.ticks.fetch_add(1, Ordering::SeqCst);

                if in_flight.swap(true, Ordering::SeqCst) {
                    counters.skipped.fetch_add(1, Ordering::SeqCst);
                    metrics::POLL_TICKS_SKIPPED.inc();
                    tracing::debug!(
                        target: "ispapp::poller",
                        "previous check still pending; skipping tick"
                    );
                    continue;
                }

                counters.checks.fetch_add(1, Ordering::SeqCst);
                let session = Arc::clone(&session);
                let in_flight = Arc::clone(&in_flight);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    // Failures are logged by the session itself.
                    let _ = session.probe(Some(&cancel)).await;
                    in_flight.store(false, Ordering::SeqCst);
                });
            }
        }
    }

    tracing::debug!(target: "ispapp::poller", "status poller stopped");
}
