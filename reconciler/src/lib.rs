pub mod apply;
pub mod config;
pub mod ingress;
pub mod intent;
pub mod kubernetes;
pub mod metrics_defs;
pub mod process;
pub mod rate_limiter;
pub mod reconcile;
pub mod render;
pub mod route_table;
pub mod sanitize;
pub mod types;

#[cfg(test)]
mod testutils;

use apply::{ApplyEngine, ApplyError};
use config::{Config, IntentSourceConfig, ValidationError};
use intent::{FilesystemIntentSource, IntentError, IntentSource};
use kubernetes::KubernetesIntentSource;
use process::TokioProcessExecutor;
use rate_limiter::RateLimiter;
use reconcile::{Reconciler, build_artifact};
use render::{RenderError, Renderer};
use sanitize::Sanitizer;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use tokio::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ReconcilerError {
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("intent source error: {0}")]
    Intent(#[from] IntentError),
    #[error("render error: {0}")]
    Render(#[from] RenderError),
    #[error("apply engine error: {0}")]
    Apply(#[from] ApplyError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn intent_source(config: &IntentSourceConfig) -> Result<Arc<dyn IntentSource>, IntentError> {
    match config {
        IntentSourceConfig::Kubernetes(k8s) => Ok(Arc::new(KubernetesIntentSource::new(k8s)?)),
        IntentSourceConfig::Filesystem { path } => Ok(Arc::new(FilesystemIntentSource::new(path))),
    }
}

/// Fetches the routing intent once and returns the configuration it renders
/// to. Nothing is written and the proxy is not contacted.
pub async fn render_once(config: &Config) -> Result<String, ReconcilerError> {
    config.validate()?;
    let source = intent_source(&config.intent_source)?;
    let renderer = Renderer::new(&config.render)?;
    let sanitizer = Sanitizer::new(config.bypass_backends.clone());

    let snapshot = source.list_rules().await?;
    let artifact = build_artifact(&snapshot, &renderer, &sanitizer)?;
    Ok(artifact.text().to_string())
}

/// Runs the admin listener and the reconciliation loop until either stops.
/// The loop itself never returns; only an admin listener failure or an
/// initialization error ends this future.
pub async fn run(config: Config) -> Result<(), ReconcilerError> {
    config.validate()?;

    let source = intent_source(&config.intent_source)?;
    let renderer = Renderer::new(&config.render)?;
    let sanitizer = Sanitizer::new(config.bypass_backends.clone());
    let executor = Arc::new(TokioProcessExecutor::new(Duration::from_secs(
        config.proxy.command_timeout_secs,
    )));
    let engine = Arc::new(ApplyEngine::new(&config.proxy, executor)?);

    tracing::info!(
        path = ?engine.config_path(),
        qps = config.rate_limit.qps,
        policy = ?config.snapshot_policy,
        "Starting reconciler"
    );

    let probe_engine = engine.clone();
    let admin_service: AdminService<_, ReconcilerError> =
        AdminService::new(move || probe_engine.probe());
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let reconciler = Reconciler::new(source, renderer, sanitizer, engine, config.snapshot_policy);
    let loop_task = reconciler.run(RateLimiter::new(config.rate_limit));

    tokio::select! {
        result = admin_task => result,
        _ = loop_task => Ok(()),
    }
}
