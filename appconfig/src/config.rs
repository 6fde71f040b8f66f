use crate::poller::PollTiming;
use crate::types::SessionParams;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_APPLICATION_VAR: &str = "APP_ID";
pub const DEFAULT_ENVIRONMENT_VAR: &str = "ENV_ID";
pub const DEFAULT_PROFILE_VAR: &str = "CONFIG_PROFILE_ID";

/// Where an application, environment or profile identifier comes from.
///
/// ```yaml
/// application: ConfigSourceDemo      # literal
/// environment: { env: DEPLOY_ENV }   # read from an environment variable
/// ```
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum Identifier {
    Literal(String),
    FromEnv { env: String },
}

impl Identifier {
    fn resolve<F>(
        identifier: Option<&Identifier>,
        field: &'static str,
        default_var: &str,
        lookup: &F,
    ) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = match identifier {
            Some(Identifier::Literal(value)) => return Ok(value.clone()),
            Some(Identifier::FromEnv { env }) => env.as_str(),
            None => default_var,
        };

        lookup(var)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingIdentifier {
                field,
                var: var.to_string(),
            })
    }
}

fn default_min_poll_interval_secs() -> u64 {
    15
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum Protocol {
    Session {
        #[serde(default = "default_min_poll_interval_secs")]
        required_minimum_poll_interval_secs: u64,
    },
    Versioned,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Session {
            required_minimum_poll_interval_secs: default_min_poll_interval_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:2772".into()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_fetch_timeout_secs() -> u64 {
    5
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub application: Option<Identifier>,
    pub environment: Option<Identifier>,
    pub configuration_profile: Option<Identifier>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Keys every payload must contain to be accepted.
    #[serde(default)]
    pub required_keys: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            endpoint: default_endpoint(),
            protocol: Protocol::default(),
            application: None,
            environment: None,
            configuration_profile: None,
            poll_interval_secs: default_poll_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            required_keys: Vec::new(),
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("poll_interval_secs"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("fetch_timeout_secs"));
        }
        if let Protocol::Session {
            required_minimum_poll_interval_secs: minimum,
        } = self.protocol
        {
            if self.poll_interval_secs < minimum {
                return Err(ConfigError::PollIntervalBelowMinimum {
                    interval: self.poll_interval_secs,
                    minimum,
                });
            }
        }
        Ok(())
    }

    pub fn timing(&self) -> PollTiming {
        PollTiming {
            interval: Duration::from_secs(self.poll_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    /// Resolves identifiers against the process environment.
    pub fn session_params(&self) -> Result<SessionParams, ConfigError> {
        self.session_params_with(|var| std::env::var(var).ok())
    }

    pub fn session_params_with<F>(&self, lookup: F) -> Result<SessionParams, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required_minimum_poll_interval = match self.protocol {
            Protocol::Session {
                required_minimum_poll_interval_secs,
            } => Duration::from_secs(required_minimum_poll_interval_secs),
            Protocol::Versioned => Duration::ZERO,
        };

        Ok(SessionParams {
            application: Identifier::resolve(
                self.application.as_ref(),
                "application",
                DEFAULT_APPLICATION_VAR,
                &lookup,
            )?,
            environment: Identifier::resolve(
                self.environment.as_ref(),
                "environment",
                DEFAULT_ENVIRONMENT_VAR,
                &lookup,
            )?,
            configuration_profile: Identifier::resolve(
                self.configuration_profile.as_ref(),
                "configuration_profile",
                DEFAULT_PROFILE_VAR,
                &lookup,
            )?,
            required_minimum_poll_interval,
        })
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidListener(name));
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 3001,
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub source: SourceConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate("listener")?;
        self.admin_listener.validate("admin_listener")?;
        if self.listener.host == self.admin_listener.host
            && self.listener.port == self.admin_listener.port
        {
            return Err(ConfigError::InvalidListener("admin_listener"));
        }
        self.source.validate()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{field} identifier not set: environment variable {var} is missing or empty")]
    MissingIdentifier { field: &'static str, var: String },
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("poll_interval_secs {interval} is below the session minimum of {minimum}")]
    PollIntervalBelowMinimum { interval: u64, minimum: u64 },
    #[error("invalid {0}: port must be non-zero and distinct")]
    InvalidListener(&'static str),
}
