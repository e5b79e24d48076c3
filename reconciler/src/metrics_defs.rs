//! Metrics definitions for the reconciler.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RECONCILE_CYCLES: MetricDef = MetricDef {
    name: "reconcile.cycles",
    metric_type: MetricType::Counter,
    description: "Number of reconciliation cycles started",
};

pub const RECONCILE_UNCHANGED: MetricDef = MetricDef {
    name: "reconcile.unchanged",
    metric_type: MetricType::Counter,
    description: "Number of cycles where the fetched snapshot matched the known one",
};

pub const RECONCILE_FETCH_ERRORS: MetricDef = MetricDef {
    name: "reconcile.fetch_errors",
    metric_type: MetricType::Counter,
    description: "Number of cycles aborted because listing ingresses failed",
};

pub const RECONCILE_RENDER_ERRORS: MetricDef = MetricDef {
    name: "reconcile.render_errors",
    metric_type: MetricType::Counter,
    description: "Number of cycles aborted because the route table could not be rendered",
};

pub const APPLY_SUCCESS: MetricDef = MetricDef {
    name: "apply.success",
    metric_type: MetricType::Counter,
    description: "Number of configurations validated and reloaded",
};

pub const APPLY_VALIDATION_FAILURES: MetricDef = MetricDef {
    name: "apply.validation_failures",
    metric_type: MetricType::Counter,
    description: "Number of candidate configurations rejected by the check command",
};

pub const APPLY_RELOAD_FAILURES: MetricDef = MetricDef {
    name: "apply.reload_failures",
    metric_type: MetricType::Counter,
    description: "Number of reload commands that failed",
};

pub const APPLY_WRITE_FAILURES: MetricDef = MetricDef {
    name: "apply.write_failures",
    metric_type: MetricType::Counter,
    description: "Number of candidate configurations that could not be written",
};

pub const APPLY_DURATION: MetricDef = MetricDef {
    name: "apply.duration",
    metric_type: MetricType::Histogram,
    description: "Time to validate and reload a configuration in seconds",
};

pub const ROUTE_TABLE_RULES: MetricDef = MetricDef {
    name: "route_table.rules",
    metric_type: MetricType::Gauge,
    description: "Number of routing rules in the last rendered route table",
};

pub const ROUTE_TABLE_BACKENDS: MetricDef = MetricDef {
    name: "route_table.backends",
    metric_type: MetricType::Gauge,
    description: "Number of backends in the last rendered route table",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RECONCILE_CYCLES,
    RECONCILE_UNCHANGED,
    RECONCILE_FETCH_ERRORS,
    RECONCILE_RENDER_ERRORS,
    APPLY_SUCCESS,
    APPLY_VALIDATION_FAILURES,
    APPLY_RELOAD_FAILURES,
    APPLY_WRITE_FAILURES,
    APPLY_DURATION,
    ROUTE_TABLE_RULES,
    ROUTE_TABLE_BACKENDS,
];
