//! Test doubles for the remote configuration store.

use crate::remote::{RemoteError, RemoteSession};
use crate::types::{ContinuationToken, ConfigValues, PollResult, Session, SessionParams};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub fn demo_params() -> SessionParams {
    SessionParams {
        application: "ConfigSourceDemo".into(),
        environment: "Sandbox".into(),
        configuration_profile: "json-profile".into(),
        required_minimum_poll_interval: Duration::from_secs(15),
    }
}

pub fn values(pairs: &[(&str, &str)]) -> ConfigValues {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Default)]
struct ServerState {
    content: String,
    version: u32,
    fail_with: Option<StatusCode>,
    omit_token_headers: bool,
    session_requests: usize,
    fetch_requests: usize,
    last_session_request: Option<serde_json::Value>,
    last_fetch_request: Option<(String, String)>,
}

/// In-process HTTP server speaking both remote protocols.
///
/// Session tokens have the form `token-N`, where N is the content version the
/// holder has already seen. The versioned endpoint always returns the current
/// content together with its version.
pub struct TestAppConfigServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
    handle: JoinHandle<()>,
}

impl TestAppConfigServer {
    pub async fn spawn(content: &str) -> Self {
        let state = Arc::new(Mutex::new(ServerState {
            content: content.to_string(),
            version: 1,
            ..Default::default()
        }));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let port = listener.local_addr().unwrap().port();

        let server_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let state = server_state.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, Infallible>(route_request(req, state).await) }
                    });
                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(
                        TokioExecutor::new(),
                    )
                    .serve_connection(io, service)
                    .await
                    {
                        eprintln!("Error serving connection: {:?}", err);
                    }
                });
            }
        });

        TestAppConfigServer {
            port,
            state,
            handle,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Replaces the content and bumps the version.
    pub fn publish(&self, content: &str) {
        let mut state = self.state.lock();
        state.content = content.to_string();
        state.version += 1;
    }

    /// Answers every request with `status` until reset with `None`.
    pub fn fail_with(&self, status: Option<StatusCode>) {
        self.state.lock().fail_with = status;
    }

    pub fn omit_token_headers(&self, omit: bool) {
        self.state.lock().omit_token_headers = omit;
    }

    pub fn session_requests(&self) -> usize {
        self.state.lock().session_requests
    }

    pub fn fetch_requests(&self) -> usize {
        self.state.lock().fetch_requests
    }

    pub fn last_session_request(&self) -> Option<serde_json::Value> {
        self.state.lock().last_session_request.clone()
    }

    /// Path and raw query of the last configuration fetch.
    pub fn last_fetch_request(&self) -> Option<(String, String)> {
        self.state.lock().last_fetch_request.clone()
    }
}

impl Drop for TestAppConfigServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn route_request(
    req: Request<Incoming>,
    state: Arc<Mutex<ServerState>>,
) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or_default().to_string();
    let is_session = parts.method == Method::POST && path == "/configurationsessions";
    let is_fetch = parts.method == Method::GET
        && (path == "/configuration" || path.starts_with("/applications/"));

    let mut state = state.lock();
    if is_session {
        state.session_requests += 1;
        state.last_session_request = serde_json::from_slice(&body).ok();
    }
    if is_fetch {
        state.fetch_requests += 1;
        state.last_fetch_request = Some((path.clone(), query.clone()));
    }

    if let Some(status) = state.fail_with {
        return respond(status, None, Bytes::new());
    }

    if is_session {
        let body = serde_json::json!({ "InitialConfigurationToken": "token-0" }).to_string();
        return respond(StatusCode::CREATED, None, Bytes::from(body));
    }

    if !is_fetch {
        return respond(StatusCode::NOT_FOUND, None, Bytes::new());
    }

    let version = state.version.to_string();
    let content = Bytes::from(state.content.clone());

    if path == "/configuration" {
        let seen = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "configuration_token")
            .and_then(|(_, token)| token.strip_prefix("token-").map(str::to_string));
        let Some(seen) = seen else {
            return respond(StatusCode::BAD_REQUEST, None, Bytes::new());
        };

        let next_token = format!("token-{version}");
        let header = (!state.omit_token_headers)
            .then_some(("Next-Poll-Configuration-Token", next_token.as_str()));
        let body = if seen == version { Bytes::new() } else { content };
        return respond(StatusCode::OK, header, body);
    }

    let header = (!state.omit_token_headers).then_some(("Configuration-Version", version.as_str()));
    respond(StatusCode::OK, header, content)
}

fn respond(
    status: StatusCode,
    header: Option<(&str, &str)>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    if let Some((name, value)) = header {
        builder = builder.header(name, value);
    }
    builder.body(Full::new(body)).unwrap()
}

enum Scripted {
    Result(PollResult),
    Delayed(Duration, PollResult),
    Panic,
    Stall,
}

/// Remote double replaying a queue of scripted poll results. Once the queue
/// is drained every fetch reports `Unchanged`.
pub struct ScriptedRemote {
    initial_token: Option<ContinuationToken>,
    unavailable: bool,
    script: Mutex<VecDeque<Scripted>>,
    sessions: AtomicUsize,
    fetches: AtomicUsize,
    seen_tokens: Mutex<Vec<Option<ContinuationToken>>>,
    fetch_started: Mutex<Vec<Instant>>,
}

impl ScriptedRemote {
    pub fn new(initial_token: Option<&str>) -> Self {
        ScriptedRemote {
            initial_token: initial_token.map(ContinuationToken::from),
            unavailable: false,
            script: Mutex::new(VecDeque::new()),
            sessions: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
            fetch_started: Mutex::new(Vec::new()),
        }
    }

    /// A remote whose session can never be opened.
    pub fn unavailable() -> Self {
        ScriptedRemote {
            unavailable: true,
            ..ScriptedRemote::new(None)
        }
    }

    pub fn push_update(&self, pairs: &[(&str, &str)], token: &str) -> &Self {
        self.push(Scripted::Result(PollResult::Updated {
            values: values(pairs),
            token: token.into(),
        }))
    }

    pub fn push_unchanged(&self) -> &Self {
        self.push(Scripted::Result(PollResult::Unchanged))
    }

    pub fn push_failure(&self) -> &Self {
        self.push(Scripted::Result(PollResult::Failed(
            RemoteError::MalformedResponse("scripted failure".into()),
        )))
    }

    /// An update that takes `delay` to arrive.
    pub fn push_delayed_update(
        &self,
        delay: Duration,
        pairs: &[(&str, &str)],
        token: &str,
    ) -> &Self {
        self.push(Scripted::Delayed(
            delay,
            PollResult::Updated {
                values: values(pairs),
                token: token.into(),
            },
        ))
    }

    pub fn push_delayed_unchanged(&self, delay: Duration) -> &Self {
        self.push(Scripted::Delayed(delay, PollResult::Unchanged))
    }

    pub fn push_panic(&self) -> &Self {
        self.push(Scripted::Panic)
    }

    pub fn push_stall(&self) -> &Self {
        self.push(Scripted::Stall)
    }

    fn push(&self, entry: Scripted) -> &Self {
        self.script.lock().push_back(entry);
        self
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// When each fetch began, in order.
    pub fn fetch_started(&self) -> Vec<Instant> {
        self.fetch_started.lock().clone()
    }

    /// Tokens passed to each fetch, in order.
    pub fn seen_tokens(&self) -> Vec<Option<ContinuationToken>> {
        self.seen_tokens.lock().clone()
    }
}

#[async_trait]
impl RemoteSession for ScriptedRemote {
    async fn open_session(
        &self,
        _client_id: &str,
        _params: &SessionParams,
    ) -> Result<Option<ContinuationToken>, RemoteError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(RemoteError::Unauthorized(StatusCode::FORBIDDEN));
        }
        Ok(self.initial_token.clone())
    }

    async fn fetch(&self, session: &Session) -> PollResult {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetch_started.lock().push(Instant::now());
        self.seen_tokens.lock().push(session.token().cloned());

        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Result(result)) => result,
            Some(Scripted::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            Some(Scripted::Panic) => panic!("scripted panic"),
            Some(Scripted::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                PollResult::Unchanged
            }
            None => PollResult::Unchanged,
        }
    }
}
