use super::{RemoteError, endpoint_url, header_token};
use crate::payload::parse_payload;
use crate::types::{ContinuationToken, PollResult, SessionParams};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRIES: u32 = 3;

const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,     // 429
    StatusCode::INTERNAL_SERVER_ERROR, // 500
    StatusCode::BAD_GATEWAY,           // 502
    StatusCode::SERVICE_UNAVAILABLE,   // 503
    StatusCode::GATEWAY_TIMEOUT,       // 504
];

pub(crate) const NEXT_TOKEN_HEADER: &str = "next-poll-configuration-token";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartSessionRequest<'a> {
    application_identifier: &'a str,
    environment_identifier: &'a str,
    configuration_profile_identifier: &'a str,
    required_minimum_poll_interval_in_seconds: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartSessionResponse {
    initial_configuration_token: String,
}

/// Session-token protocol: a session is opened once and every successful
/// fetch hands back the token for the next one.
#[derive(Clone)]
pub struct SessionProtocol {
    client: reqwest::Client,
    sessions_url: Url,
    configuration_url: Url,
    required_keys: Vec<String>,
    retry_base_delay: Duration,
}

impl SessionProtocol {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        required_keys: Vec<String>,
    ) -> Result<Self, RemoteError> {
        Ok(SessionProtocol {
            client,
            sessions_url: endpoint_url(endpoint, &["configurationsessions"])?,
            configuration_url: endpoint_url(endpoint, &["configuration"])?,
            required_keys,
            retry_base_delay: BASE_DELAY,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Starts a configuration session. Retriable statuses are retried with
    /// exponential backoff; anything else fails straight away.
    pub async fn open_session(
        &self,
        params: &SessionParams,
    ) -> Result<ContinuationToken, RemoteError> {
        let body = StartSessionRequest {
            application_identifier: &params.application,
            environment_identifier: &params.environment,
            configuration_profile_identifier: &params.configuration_profile,
            required_minimum_poll_interval_in_seconds: params
                .required_minimum_poll_interval
                .as_secs(),
        };

        let mut retries = 0;

        loop {
            let response = self
                .client
                .post(self.sessions_url.clone())
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                if RETRIABLE_STATUS_CODES.contains(&status) && retries < MAX_RETRIES {
                    let delay = self.retry_base_delay * 2_u32.pow(retries);
                    tracing::debug!(%status, ?delay, "session start rejected, retrying");
                    sleep(delay).await;
                    retries += 1;
                    continue;
                }

                return Err(match RETRIABLE_STATUS_CODES.contains(&status) {
                    true => RemoteError::RetriesExceeded(status),
                    false => RemoteError::from_status(status),
                });
            }

            let started = response
                .json::<StartSessionResponse>()
                .await
                .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;

            if started.initial_configuration_token.is_empty() {
                return Err(RemoteError::MalformedResponse(
                    "empty initial configuration token".into(),
                ));
            }

            return Ok(started.initial_configuration_token.into());
        }
    }

    /// An empty body means nothing changed since `token` was issued.
    pub async fn fetch(
        &self,
        token: Option<&ContinuationToken>,
    ) -> Result<PollResult, RemoteError> {
        let token = token.ok_or(RemoteError::MissingToken)?;

        let response = self
            .client
            .get(self.configuration_url.clone())
            .query(&[("configuration_token", token.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status));
        }

        let next_token = header_token(&response, NEXT_TOKEN_HEADER);
        let body = response.bytes().await?;

        if body.is_empty() {
            return Ok(PollResult::Unchanged);
        }

        let next_token = next_token.ok_or_else(|| {
            RemoteError::MalformedResponse(format!("missing {NEXT_TOKEN_HEADER} header"))
        })?;
        let values = parse_payload(&body, &self.required_keys)?;

        Ok(PollResult::Updated {
            values,
            token: next_token,
        })
    }
}
