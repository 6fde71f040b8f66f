//! Transport strategies for talking to the remote configuration store.
//!
//! Two protocols are supported. The `session` protocol opens a session and
//! long-polls with continuation tokens handed out by the service. The
//! `versioned` protocol is stateless and passes back the last configuration
//! version it saw. Both are exposed through the [`RemoteSession`] trait so the
//! poller does not need to know which one is in use.

mod session;
mod versioned;

pub use session::SessionProtocol;
pub use versioned::VersionedProtocol;

use crate::config::{Protocol, SourceConfig};
use crate::payload::PayloadError;
use crate::types::{ContinuationToken, PollResult, Session, SessionParams};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("credentials rejected with status {0}")]
    Unauthorized(StatusCode),
    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),
    #[error("remote unavailable after retries, last status {0}")]
    RetriesExceeded(StatusCode),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),
    #[error("no continuation token to poll with")]
    MissingToken,
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("fetch task failed: {0}")]
    TaskFailed(String),
}

impl RemoteError {
    fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(status),
            _ => RemoteError::UnexpectedStatus(status),
        }
    }
}

/// The two remote operations the poller needs.
///
/// Implementations must not mutate any state shared with readers; merging
/// results into the cache is the poller's job.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Opens a polling session and returns the token the first fetch should
    /// use. Protocols without sessions return `None` once the remote has been
    /// reached and has accepted the credentials.
    async fn open_session(
        &self,
        client_id: &str,
        params: &SessionParams,
    ) -> Result<Option<ContinuationToken>, RemoteError>;

    /// Fetches the latest configuration for the session's current token.
    /// Errors are reported as [`PollResult::Failed`], never raised.
    async fn fetch(&self, session: &Session) -> PollResult;
}

/// Protocol implementation selected from configuration.
#[derive(Clone)]
pub struct RemoteClient(RemoteInner);

#[derive(Clone)]
enum RemoteInner {
    Session(SessionProtocol),
    Versioned(VersionedProtocol),
}

impl RemoteClient {
    pub fn new(config: &SourceConfig) -> Result<Self, RemoteError> {
        let client = http_client(Duration::from_secs(config.fetch_timeout_secs))?;
        let required_keys = config.required_keys.clone();

        let inner = match config.protocol {
            Protocol::Session { .. } => RemoteInner::Session(SessionProtocol::new(
                client,
                &config.endpoint,
                required_keys,
            )?),
            Protocol::Versioned => RemoteInner::Versioned(VersionedProtocol::new(
                client,
                &config.endpoint,
                required_keys,
            )?),
        };

        Ok(RemoteClient(inner))
    }

    pub fn protocol_name(&self) -> &'static str {
        match &self.0 {
            RemoteInner::Session(_) => "session",
            RemoteInner::Versioned(_) => "versioned",
        }
    }
}

#[async_trait]
impl RemoteSession for RemoteClient {
    async fn open_session(
        &self,
        client_id: &str,
        params: &SessionParams,
    ) -> Result<Option<ContinuationToken>, RemoteError> {
        match &self.0 {
            RemoteInner::Session(p) => p.open_session(params).await.map(Some),
            RemoteInner::Versioned(p) => p.open_session(client_id, params).await.map(|()| None),
        }
    }

    async fn fetch(&self, session: &Session) -> PollResult {
        let result = match &self.0 {
            RemoteInner::Session(p) => p.fetch(session.token()).await,
            RemoteInner::Versioned(p) => p.fetch(session).await,
        };

        result.unwrap_or_else(PollResult::Failed)
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Reads a response header as a token. Empty or non-ASCII values count as absent.
fn header_token(response: &reqwest::Response, name: &str) -> Option<ContinuationToken> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ContinuationToken::from)
}

/// Joins the endpoint and the given path segments, percent-encoding each segment.
fn endpoint_url(endpoint: &str, segments: &[&str]) -> Result<url::Url, RemoteError> {
    let mut url =
        url::Url::parse(endpoint).map_err(|e| RemoteError::InvalidUrl(format!("{endpoint}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| RemoteError::InvalidUrl(format!("{endpoint}: cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
