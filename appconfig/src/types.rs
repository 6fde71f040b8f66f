use crate::remote::RemoteError;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type ConfigValues = HashMap<String, String>;

/// Opaque marker of the remote state a fetch was made against. Either a
/// session continuation token or a configuration version, depending on the
/// protocol. Tokens are only ever compared for equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContinuationToken(Arc<str>);

impl ContinuationToken {
    pub fn new<T>(value: T) -> Self
    where
        T: Into<Arc<str>>,
    {
        ContinuationToken(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContinuationToken {
    fn from(value: &str) -> Self {
        ContinuationToken::new(value)
    }
}

impl From<String> for ContinuationToken {
    fn from(value: String) -> Self {
        ContinuationToken::new(value)
    }
}

/// The complete set of values known at one point in time, plus the token of
/// the remote state it was built from. Never mutated once built.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigSnapshot {
    values: ConfigValues,
    token: Option<ContinuationToken>,
}

impl ConfigSnapshot {
    pub fn new(values: ConfigValues, token: ContinuationToken) -> Self {
        ConfigSnapshot {
            values,
            token: Some(token),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    pub fn values(&self) -> &ConfigValues {
        &self.values
    }

    /// `None` until the first payload has been applied.
    pub fn token(&self) -> Option<&ContinuationToken> {
        self.token.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of a single fetch against the remote store.
#[derive(Debug)]
pub enum PollResult {
    /// The remote has nothing newer than the token that was sent.
    Unchanged,
    Updated {
        values: ConfigValues,
        token: ContinuationToken,
    },
    Failed(RemoteError),
}

/// Identifies the configuration to poll for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionParams {
    pub application: String,
    pub environment: String,
    pub configuration_profile: String,
    pub required_minimum_poll_interval: Duration,
}

/// Polling state owned by the poller: a client id assigned once, and the
/// token the next fetch is made with.
#[derive(Clone, Debug)]
pub struct Session {
    client_id: String,
    params: SessionParams,
    token: Option<ContinuationToken>,
}

impl Session {
    pub(crate) fn new(
        client_id: String,
        params: SessionParams,
        token: Option<ContinuationToken>,
    ) -> Self {
        Session {
            client_id,
            params,
            token,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn token(&self) -> Option<&ContinuationToken> {
        self.token.as_ref()
    }

    pub(crate) fn advance(&mut self, token: ContinuationToken) {
        self.token = Some(token);
    }
}
