mod config;

use clap::Parser;
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "appconfig-agent", version, about)]
enum CliCommand {
    /// Poll the remote configuration store and serve the lookup API
    Run {
        #[arg(long)]
        config_file: PathBuf,
    },
    /// Load and validate a config file, then exit
    Check {
        #[arg(long)]
        config_file: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),
    #[error("could not install logger: {0}")]
    Logger(#[from] tracing_subscriber::util::TryInitError),
    #[error("could not set up statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Run(#[from] appconfig::RunError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match &cli {
        CliCommand::Run { config_file } => run(config_file),
        CliCommand::Check { config_file } => check(config_file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("appconfig-agent: {e}");
            ExitCode::FAILURE
        }
    }
}

fn check(path: &Path) -> Result<(), AgentError> {
    let config = Config::from_file(path)?;
    config.validate()?;
    println!("{}: ok", path.display());
    Ok(())
}

fn run(path: &Path) -> Result<(), AgentError> {
    let config = Config::from_file(path)?;
    config.validate()?;

    // Held for the lifetime of the process so buffered events are flushed on exit
    let _sentry = init_logging(config.common.logging.as_ref())?;

    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }
    shared::metrics_defs::describe_all(appconfig::metrics_defs::ALL_METRICS);

    tracing::info!(config_file = %path.display(), "starting appconfig-agent");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(appconfig::run(config.appconfig))?;

    tracing::info!("appconfig-agent stopped");
    Ok(())
}

fn init_logging(
    logging: Option<&LoggingConfig>,
) -> Result<Option<sentry::ClientInitGuard>, AgentError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(logging.map_or("info", |l| l.filter.as_str()))?,
    };

    let sentry_guard = match logging.and_then(|l| l.sentry_dsn.as_deref()) {
        Some(dsn) => {
            let dsn = dsn.parse::<sentry::types::Dsn>().map_err(ConfigError::from)?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        None => None,
    };

    let sentry_layer = sentry_guard
        .is_some()
        .then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(sentry_layer)
        .try_init()?;

    Ok(sentry_guard)
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), AgentError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.clone(), metrics.statsd_port)
        .build(Some(&metrics.prefix))?;
    metrics::set_global_recorder(recorder).map_err(|_| AgentError::RecorderInstalled)?;

    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "statsd exporter installed"
    );
    Ok(())
}
