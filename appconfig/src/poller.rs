use crate::cache::ConfigCache;
use crate::metrics_defs::{POLL_DURATION, POLL_FAILED, POLL_UNCHANGED, POLL_UPDATED};
use crate::remote::{RemoteError, RemoteSession};
use crate::types::{ConfigSnapshot, PollResult, Session};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};

#[derive(Debug)]
pub(crate) enum Command {
    // Run a poll immediately instead of waiting for the next tick.
    // The worker replies with the outcome once the poll finishes.
    Refresh(oneshot::Sender<TickOutcome>),
    // Stop the loop. Any poll in progress completes first.
    Shutdown,
}

/// What a single poll did to the snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Updated,
    Unchanged,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollTiming {
    pub interval: Duration,
    pub fetch_timeout: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        PollTiming {
            interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

/// Drives fetches and owns the session. Only the poller ever writes to the cache.
pub(crate) struct Poller {
    remote: Arc<dyn RemoteSession>,
    session: Session,
    cache: Arc<ConfigCache>,
    timing: PollTiming,
}

impl Poller {
    pub(crate) fn new(
        remote: Arc<dyn RemoteSession>,
        session: Session,
        cache: Arc<ConfigCache>,
        timing: PollTiming,
    ) -> Self {
        Poller {
            remote,
            session,
            cache,
            timing,
        }
    }

    /// Runs one poll. Never fails: errors are logged and leave the snapshot
    /// and token as they were.
    pub(crate) async fn tick(&mut self) -> TickOutcome {
        let started = Instant::now();

        let outcome = match self.fetch_isolated().await {
            PollResult::Updated { values, token } => {
                let key_count = values.len();
                let applied = self.cache.replace(ConfigSnapshot::new(values, token.clone()));
                self.session.advance(token.clone());

                if applied {
                    tracing::info!(token = %token, keys = key_count, "applied new configuration");
                    counter!(POLL_UPDATED).increment(1);
                    TickOutcome::Updated
                } else {
                    tracing::debug!(token = %token, "configuration already applied");
                    counter!(POLL_UNCHANGED).increment(1);
                    TickOutcome::Unchanged
                }
            }
            PollResult::Unchanged => {
                tracing::debug!(token = ?self.session.token(), "no configuration changes");
                counter!(POLL_UNCHANGED).increment(1);
                TickOutcome::Unchanged
            }
            PollResult::Failed(err) => {
                tracing::warn!(error = %err, "configuration poll failed, keeping current snapshot");
                counter!(POLL_FAILED).increment(1);
                TickOutcome::Failed
            }
        };

        histogram!(POLL_DURATION).record(started.elapsed().as_secs_f64());
        outcome
    }

    /// Runs the fetch on its own task so that a panic or a stalled request
    /// cannot take the schedule down with it.
    async fn fetch_isolated(&self) -> PollResult {
        let remote = self.remote.clone();
        let session = self.session.clone();
        let mut handle = tokio::spawn(async move { remote.fetch(&session).await });

        match timeout(self.timing.fetch_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!("Fetch task panicked: {e}");
                PollResult::Failed(RemoteError::TaskFailed(e.to_string()))
            }
            Err(_) => {
                handle.abort();
                PollResult::Failed(RemoteError::Timeout(self.timing.fetch_timeout))
            }
        }
    }

    /// Polls at a fixed rate until the Shutdown command is received or every
    /// sender is gone. A poll that overruns the interval is followed by the
    /// next one straight away; missed ticks are skipped rather than stacked.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let period = self.timing.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                cmd = rx.recv() => match cmd {
                    Some(Command::Refresh(reply)) => {
                        let outcome = self.tick().await;
                        let _ = reply.send(outcome);
                    }
                    Some(Command::Shutdown) | None => {
                        tracing::debug!("poller shutting down");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
