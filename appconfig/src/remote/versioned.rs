use super::{RemoteError, endpoint_url, header_token};
use crate::payload::parse_payload;
use crate::types::{PollResult, Session, SessionParams};

pub(crate) const VERSION_HEADER: &str = "configuration-version";

/// Stateless protocol: every fetch names the application, environment and
/// profile directly and passes the last seen version back. The remote
/// answers with the same version when nothing changed.
#[derive(Clone)]
pub struct VersionedProtocol {
    client: reqwest::Client,
    endpoint: String,
    required_keys: Vec<String>,
}

impl VersionedProtocol {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        required_keys: Vec<String>,
    ) -> Result<Self, RemoteError> {
        // Fail on construction rather than on every poll
        endpoint_url(endpoint, &[])?;

        Ok(VersionedProtocol {
            client,
            endpoint: endpoint.to_string(),
            required_keys,
        })
    }

    /// There is no session to open, but the remote must be reachable and
    /// accept the credentials. A payload that does not parse is left for the
    /// poller to report, since the next publication may fix it.
    pub async fn open_session(
        &self,
        client_id: &str,
        params: &SessionParams,
    ) -> Result<(), RemoteError> {
        let first_poll = Session::new(client_id.to_string(), params.clone(), None);
        match self.fetch(&first_poll).await {
            Ok(_) | Err(RemoteError::MalformedPayload(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn fetch(&self, session: &Session) -> Result<PollResult, RemoteError> {
        let params = session.params();
        let mut url = endpoint_url(
            &self.endpoint,
            &[
                "applications",
                params.application.as_str(),
                "environments",
                params.environment.as_str(),
                "configurations",
                params.configuration_profile.as_str(),
            ],
        )?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", session.client_id());
            if let Some(version) = session.token() {
                query.append_pair("client_configuration_version", version.as_str());
            }
        }

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status));
        }

        let version = header_token(&response, VERSION_HEADER);
        let body = response.bytes().await?;

        if body.is_empty() {
            return Ok(PollResult::Unchanged);
        }

        let version = version.ok_or_else(|| {
            RemoteError::MalformedResponse(format!("missing {VERSION_HEADER} header"))
        })?;

        // Only equality with the version we sent is checked, versions are not ordered
        if session.token() == Some(&version) {
            tracing::debug!(%version, "still on the same configuration version");
            return Ok(PollResult::Unchanged);
        }

        let values = parse_payload(&body, &self.required_keys)?;

        Ok(PollResult::Updated {
            values,
            token: version,
        })
    }
}
