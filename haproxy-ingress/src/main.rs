mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use reconciler::ReconcilerError;
use reconciler::config::ValidationError;
use reconciler::render::Renderer;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "haproxy_ingress";

#[derive(Parser)]
#[command(version, about = "Keeps HAProxy in sync with Kubernetes Ingress resources")]
enum CliCommand {
    /// Run the reconciliation loop against the live proxy.
    Run(ConfigArgs),
    /// Print the configuration the current routing intent renders to.
    Render(ConfigArgs),
    /// Validate the config file and exit.
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(
        long,
        env = "HAPROXY_INGRESS_CONFIG",
        default_value = "/etc/haproxy-ingress/config.yaml"
    )]
    config_file: PathBuf,

    /// Watch a single namespace instead of the configured one.
    #[arg(long, env = "INGRESS_NAMESPACE")]
    namespace: Option<String>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Reconciler(#[from] ReconcilerError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Run(args) => run(&args),
        CliCommand::Render(args) => render(&args),
        CliCommand::CheckConfig(args) => check_config(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<Config, CliError> {
    let mut config = Config::from_file(&args.config_file)?;
    if let Some(namespace) = &args.namespace {
        config.override_namespace(namespace.clone());
    }
    config.reconciler.validate()?;
    Ok(config)
}

fn run(args: &ConfigArgs) -> Result<(), CliError> {
    let config = load_config(args)?;

    let _sentry = config.common.logging.as_ref().map(init_sentry);
    init_logging(config.common.logging.is_some());
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    tracing::info!(config_file = ?args.config_file, "Starting haproxy-ingress");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        tokio::select! {
            result = reconciler::run(config.reconciler) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received interrupt, shutting down");
                Ok(())
            }
        }
    })?;

    Ok(())
}

fn render(args: &ConfigArgs) -> Result<(), CliError> {
    let config = load_config(args)?;
    init_logging(false);

    let runtime = tokio::runtime::Runtime::new()?;
    let text = runtime.block_on(reconciler::render_once(&config.reconciler))?;
    print!("{text}");
    Ok(())
}

fn check_config(args: &ConfigArgs) -> Result<(), CliError> {
    let config = load_config(args)?;
    // Loads the preamble file, if any.
    Renderer::new(&config.reconciler.render).map_err(ReconcilerError::from)?;
    println!("{}: ok", args.config_file.display());
    Ok(())
}

/// Logs go to stderr so `render` output can be piped.
fn init_logging(with_sentry: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = with_sentry.then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_layer)
        .init();
}

fn init_sentry(config: &LoggingConfig) -> sentry::ClientInitGuard {
    sentry::init((
        config.sentry_dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    ))
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;
    shared::metrics_defs::describe_all(reconciler::metrics_defs::ALL_METRICS);
    Ok(())
}
