use crate::cache::ConfigCache;
use crate::config::{ConfigError, SourceConfig};
use crate::metrics_defs::SESSION_OPEN_FAILED;
use crate::poller::{Command, PollTiming, Poller, TickOutcome};
use crate::remote::{RemoteClient, RemoteError, RemoteSession};
use crate::types::{ConfigSnapshot, ConfigValues, Session, SessionParams};
use parking_lot::Mutex;
use shared::counter;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const SOURCE_NAME: &str = "AppConfigSource";

/// Sits above packaged defaults (250) and below environment variables (300).
pub const PRIORITY: i32 = 275;

// How long shutdown waits for an in-flight poll before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Read-only view over a set of configuration values.
///
/// Reads never block on network I/O.
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &str;

    /// Ordinal used to rank this source against others. Higher wins.
    fn priority(&self) -> i32;

    fn get(&self, key: &str) -> Option<String>;

    fn keys(&self) -> BTreeSet<String>;

    fn properties(&self) -> ConfigValues;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    /// No session could be established. Reads are empty and the remote is
    /// never contacted again.
    Degraded,
    Polling,
    Closed,
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("invalid source settings: {0}")]
    InvalidSettings(#[from] ConfigError),
    #[error("could not build remote client: {0}")]
    Client(#[from] RemoteError),
    #[error("the source is not polling")]
    NotRunning,
}

struct SourceInner {
    cache: Arc<ConfigCache>,
    state: Mutex<SourceState>,
    tx: Mutex<Option<mpsc::Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Configuration source backed by a remote store.
///
/// Cheap to clone; all clones share the same cache and poller. Dropping the
/// last clone without calling [`RemoteConfigSource::shutdown`] stops the
/// poller after its current tick.
#[derive(Clone)]
pub struct RemoteConfigSource {
    inner: Arc<SourceInner>,
}

impl RemoteConfigSource {
    /// Opens a session, runs the first poll and schedules the rest.
    ///
    /// Never fails. If the session cannot be opened the source comes up
    /// degraded: every read is empty and no polling is scheduled.
    pub async fn start(
        remote: Arc<dyn RemoteSession>,
        params: SessionParams,
        timing: PollTiming,
    ) -> Self {
        let client_id = uuid::Uuid::new_v4().to_string();

        let token = match remote.open_session(&client_id, &params).await {
            Ok(token) => token,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    application = %params.application,
                    environment = %params.environment,
                    profile = %params.configuration_profile,
                    "could not open configuration session, source is degraded"
                );
                counter!(SESSION_OPEN_FAILED).increment(1);
                return Self::degraded();
            }
        };

        tracing::info!(
            %client_id,
            application = %params.application,
            environment = %params.environment,
            profile = %params.configuration_profile,
            "configuration session established"
        );

        let cache = Arc::new(ConfigCache::new());
        let session = Session::new(client_id, params, token);
        let mut poller = Poller::new(remote, session, cache.clone(), timing);

        let initial = poller.tick().await;
        tracing::info!(
            outcome = ?initial,
            keys = cache.snapshot().len(),
            "initial configuration poll finished"
        );

        let (tx, rx) = mpsc::channel::<Command>(16);
        let handle = tokio::spawn(poller.run(rx));

        RemoteConfigSource {
            inner: Arc::new(SourceInner {
                cache,
                state: Mutex::new(SourceState::Polling),
                tx: Mutex::new(Some(tx)),
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Builds the remote client described by `config` and starts it.
    ///
    /// Identifiers that cannot be resolved leave the source degraded, like a
    /// session the remote refused. Invalid settings are returned as errors.
    pub async fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        config.validate()?;
        let remote = RemoteClient::new(config)?;

        let params = match config.session_params() {
            Ok(params) => params,
            Err(err) => {
                tracing::error!(error = %err, "could not resolve session identifiers, source is degraded");
                counter!(SESSION_OPEN_FAILED).increment(1);
                return Ok(Self::degraded());
            }
        };

        tracing::debug!(
            protocol = remote.protocol_name(),
            endpoint = %config.endpoint,
            "starting configuration source"
        );

        Ok(Self::start(Arc::new(remote), params, config.timing()).await)
    }

    fn degraded() -> Self {
        RemoteConfigSource {
            inner: Arc::new(SourceInner {
                cache: Arc::new(ConfigCache::new()),
                state: Mutex::new(SourceState::Degraded),
                tx: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SourceState {
        *self.inner.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SourceState::Polling
    }

    /// The current values and the token they were fetched with, for reads
    /// that need several keys from the same generation.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.inner.cache.snapshot()
    }

    /// Polls immediately instead of waiting for the next scheduled tick.
    pub async fn refresh(&self) -> Result<TickOutcome, SourceError> {
        let tx = self.inner.tx.lock().clone().ok_or(SourceError::NotRunning)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Refresh(reply_tx))
            .await
            .map_err(|_| SourceError::NotRunning)?;
        reply_rx.await.map_err(|_| SourceError::NotRunning)
    }

    /// Stops polling and discards the cached values. An in-flight poll gets
    /// a short grace period and is then abandoned. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == SourceState::Polling {
                *state = SourceState::Closed;
            }
        }

        let tx = self.inner.tx.lock().take();
        let handle = self.inner.handle.lock().take();

        if let Some(tx) = tx {
            // A full queue or a finished worker both mean there is nothing to wait for
            let _ = tx.try_send(Command::Shutdown);
        }

        if let Some(mut handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                tracing::warn!("poller did not stop within {SHUTDOWN_GRACE:?}, aborting");
                handle.abort();
                // Wait for the abort to land so no late poll can refill the cache
                let _ = handle.await;
            }
        }

        self.inner.cache.clear();
        tracing::info!("configuration source shut down");
    }
}

impl ConfigSource for RemoteConfigSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn get(&self, key: &str) -> Option<String> {
        self.inner.cache.get(key)
    }

    fn keys(&self) -> BTreeSet<String> {
        self.inner.cache.keys()
    }

    fn properties(&self) -> ConfigValues {
        self.inner.cache.snapshot().values().clone()
    }
}
