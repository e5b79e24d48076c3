use crate::apply::{ApplyEngine, ApplyError, ApplyOutcome};
use crate::config::SnapshotPolicy;
use crate::intent::IntentSource;
use crate::metrics_defs::{
    RECONCILE_CYCLES, RECONCILE_FETCH_ERRORS, RECONCILE_RENDER_ERRORS, RECONCILE_UNCHANGED,
    ROUTE_TABLE_BACKENDS, ROUTE_TABLE_RULES,
};
use crate::rate_limiter::RateLimiter;
use crate::render::{RenderError, Renderer};
use crate::route_table::RouteTable;
use crate::sanitize::Sanitizer;
use crate::types::{ConfigArtifact, Snapshot};
use shared::{counter, gauge};
use std::sync::Arc;

#[derive(Debug, PartialEq)]
pub enum Decision {
    Unchanged,
    /// The fetched snapshot differs from the known one and should be applied.
    Apply(Snapshot),
}

/// Compares a fetched snapshot against the last known one. Nothing is known
/// before the first cycle, so the first fetch is always applied.
pub fn reconcile(known: Option<&Snapshot>, fetched: Snapshot) -> Decision {
    match known {
        Some(known) if *known == fetched => Decision::Unchanged,
        _ => Decision::Apply(fetched),
    }
}

/// Builds the sanitized configuration for a snapshot.
pub fn build_artifact(
    snapshot: &Snapshot,
    renderer: &Renderer,
    sanitizer: &Sanitizer,
) -> Result<ConfigArtifact, RenderError> {
    let table = RouteTable::build(snapshot.rules());
    let text = renderer.render(&table)?;

    gauge!(ROUTE_TABLE_RULES).set(table.rule_count() as f64);
    gauge!(ROUTE_TABLE_BACKENDS).set(table.backend_targets().len() as f64);

    Ok(ConfigArtifact::new(sanitizer.sanitize(&text)))
}

#[derive(Debug, PartialEq)]
pub enum CycleOutcome {
    Unchanged,
    FetchFailed,
    RenderFailed,
    Applied,
    /// The snapshot changed but rendered to the active configuration.
    AlreadyActive,
    Invalid,
    ReloadFailed,
    ApplyFailed,
}

/// Owns the known snapshot and drives fetch, render, sanitize and apply.
pub struct Reconciler {
    source: Arc<dyn IntentSource>,
    renderer: Renderer,
    sanitizer: Sanitizer,
    engine: Arc<ApplyEngine>,
    policy: SnapshotPolicy,
    known: Option<Snapshot>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn IntentSource>,
        renderer: Renderer,
        sanitizer: Sanitizer,
        engine: Arc<ApplyEngine>,
        policy: SnapshotPolicy,
    ) -> Self {
        Reconciler {
            source,
            renderer,
            sanitizer,
            engine,
            policy,
            known: None,
        }
    }

    pub fn known(&self) -> Option<&Snapshot> {
        self.known.as_ref()
    }

    /// Runs one cycle. Every failure is confined to the cycle; the proxy
    /// keeps serving whatever is active.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        counter!(RECONCILE_CYCLES).increment(1);

        let fetched = match self.source.list_rules().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                counter!(RECONCILE_FETCH_ERRORS).increment(1);
                tracing::warn!(error = %e, "Could not list routing intent, skipping cycle");
                return CycleOutcome::FetchFailed;
            }
        };

        let snapshot = match reconcile(self.known.as_ref(), fetched) {
            Decision::Unchanged => {
                counter!(RECONCILE_UNCHANGED).increment(1);
                tracing::trace!("Routing intent unchanged");
                return CycleOutcome::Unchanged;
            }
            Decision::Apply(snapshot) => snapshot,
        };

        tracing::info!(rules = snapshot.len(), "Routing intent changed");

        let artifact = match build_artifact(&snapshot, &self.renderer, &self.sanitizer) {
            Ok(artifact) => artifact,
            Err(e) => {
                counter!(RECONCILE_RENDER_ERRORS).increment(1);
                tracing::error!(error = %e, "Could not render configuration, skipping cycle");
                return CycleOutcome::RenderFailed;
            }
        };

        let pending = match self.policy {
            SnapshotPolicy::AdvanceOnRender => {
                self.known = Some(snapshot);
                None
            }
            SnapshotPolicy::AdvanceOnSuccess => Some(snapshot),
        };

        let outcome = match self.engine.apply(&artifact).await {
            Ok(ApplyOutcome::Activated) => CycleOutcome::Applied,
            Ok(ApplyOutcome::Unchanged) => CycleOutcome::AlreadyActive,
            Err(ApplyError::Invalid { .. }) => CycleOutcome::Invalid,
            Err(ApplyError::Reload { .. }) => CycleOutcome::ReloadFailed,
            Err(_) => CycleOutcome::ApplyFailed,
        };

        if let Some(snapshot) = pending
            && matches!(outcome, CycleOutcome::Applied | CycleOutcome::AlreadyActive)
        {
            self.known = Some(snapshot);
        }

        outcome
    }

    /// Runs cycles for as long as the future is polled. The limiter wait is
    /// the only point where the loop suspends between cycles.
    pub async fn run(mut self, mut limiter: RateLimiter) {
        loop {
            limiter.acquire().await;
            let outcome = self.run_cycle().await;
            tracing::debug!(?outcome, "Cycle finished");
        }
    }
}
