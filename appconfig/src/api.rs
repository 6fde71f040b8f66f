use crate::config::Listener as ListenerConfig;
use crate::source::ConfigSource;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub async fn serve(
    listener: ListenerConfig,
    source: Arc<dyn ConfigSource>,
) -> Result<(), ApiError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = ?listener.local_addr()?, "lookup API listening");
    serve_on(listener, source).await
}

async fn serve_on(listener: TcpListener, source: Arc<dyn ConfigSource>) -> Result<(), ApiError> {
    let app = Router::new()
        .route("/keys", get(keys_handler))
        .route("/values/{key}", get(value_handler))
        .with_state(source);

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct KeysResponse {
    keys: BTreeSet<String>,
}

#[derive(Serialize)]
struct ValueResponse {
    key: String,
    value: String,
}

impl IntoResponse for ValueResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

#[derive(thiserror::Error, Debug)]
enum LookupError {
    #[error("no value for key {0}")]
    NotFound(String),
}

impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let status = match self {
            LookupError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });

        (status, body).into_response()
    }
}

async fn keys_handler(State(source): State<Arc<dyn ConfigSource>>) -> Json<KeysResponse> {
    Json(KeysResponse {
        keys: source.keys(),
    })
}

async fn value_handler(
    State(source): State<Arc<dyn ConfigSource>>,
    Path(key): Path<String>,
) -> Result<ValueResponse, LookupError> {
    match source.get(&key) {
        Some(value) => Ok(ValueResponse { key, value }),
        None => Err(LookupError::NotFound(key)),
    }
}
