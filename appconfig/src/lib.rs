//! Polling client for a remote configuration store.
//!
//! A [`RemoteConfigSource`] opens a session against an AppConfig compatible
//! endpoint, polls it on a fixed schedule and serves the latest values from
//! memory. Readers never wait on the network.

pub mod api;
mod cache;
pub mod config;
pub mod metrics_defs;
mod payload;
mod poller;
pub mod remote;
pub mod source;
pub mod types;

#[cfg(test)]
mod testutils;

pub use cache::ConfigCache;
pub use payload::{PayloadError, parse_payload};
pub use poller::{PollTiming, TickOutcome};
pub use source::{
    ConfigSource, PRIORITY, RemoteConfigSource, SOURCE_NAME, SourceError, SourceState,
};

use api::ApiError;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration source error: {0}")]
    Source(#[from] SourceError),
    #[error("lookup API error: {0}")]
    Api(#[from] ApiError),
}

/// Starts the source and serves the lookup API and the admin endpoints until
/// one of the listeners fails or the process is interrupted.
pub async fn run(config: config::Config) -> Result<(), RunError> {
    let source = RemoteConfigSource::from_config(&config.source).await?;

    let ready_source = source.clone();
    let admin_service = AdminService::new(move || ready_source.is_ready());
    let admin_task = run_http_service::<_, RunError>(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let api_source: Arc<dyn ConfigSource> = Arc::new(source.clone());
    let api_task = async {
        api::serve(config.listener.clone(), api_source)
            .await
            .map_err(RunError::from)
    };

    let result = tokio::select! {
        res = async { tokio::try_join!(api_task, admin_task) } => res.map(|_| ()),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "listener failed");
    }

    source.shutdown().await;
    result
}
