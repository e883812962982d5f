//! Observability for the rollup engine
//!
//! Provides:
//! - Prometheus metrics (policy run latency and outcomes, roll-up aborts,
//!   source errors, store writes, discovered scopes)
//! - Structured logging with tracing

use crate::models::{Dimension, ObjectKind};
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Policy runs issue several remote queries, so buckets reach into seconds
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static GLOBAL_METRICS: OnceLock<RollupMetricsInner> = OnceLock::new();

struct RollupMetricsInner {
    policy_run_latency_seconds: HistogramVec,
    policy_runs: IntCounterVec,
    rollup_aborts: IntCounterVec,
    source_errors: IntCounterVec,
    store_writes: IntCounterVec,
    scopes_discovered: IntGaugeVec,
}

impl RollupMetricsInner {
    fn new() -> Self {
        Self {
            policy_run_latency_seconds: register_histogram_vec!(
                "rollup_policy_run_latency_seconds",
                "Time spent in one policy run",
                &["kind", "dimension"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register policy_run_latency_seconds"),

            policy_runs: register_int_counter_vec!(
                "rollup_policy_runs_total",
                "Policy runs by outcome",
                &["kind", "dimension", "outcome"]
            )
            .expect("Failed to register policy_runs_total"),

            rollup_aborts: register_int_counter_vec!(
                "rollup_aborts_total",
                "Roll-ups aborted because the finer bucket was missing or not unique",
                &["kind", "dimension"]
            )
            .expect("Failed to register rollup_aborts_total"),

            source_errors: register_int_counter_vec!(
                "rollup_source_errors_total",
                "Metric getter calls that failed and were defaulted to zero",
                &["kind", "metric"]
            )
            .expect("Failed to register source_errors_total"),

            store_writes: register_int_counter_vec!(
                "rollup_store_writes_total",
                "Samples written to the bucket store",
                &["kind", "dimension"]
            )
            .expect("Failed to register store_writes_total"),

            scopes_discovered: register_int_gauge_vec!(
                "rollup_scopes_discovered",
                "Scopes found by the last discovery pass",
                &["kind"]
            )
            .expect("Failed to register scopes_discovered"),
        }
    }
}

/// Handle to the process-wide rollup metrics. Clones share the same metrics.
#[derive(Clone)]
pub struct RollupMetrics {
    _private: (),
}

impl Default for RollupMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RollupMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RollupMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RollupMetricsInner {
        GLOBAL_METRICS.get_or_init(RollupMetricsInner::new)
    }

    pub fn observe_policy_run(&self, kind: ObjectKind, dimension: &str, outcome: &str, duration_secs: f64) {
        self.inner()
            .policy_run_latency_seconds
            .with_label_values(&[kind.as_str(), dimension])
            .observe(duration_secs);
        self.inner()
            .policy_runs
            .with_label_values(&[kind.as_str(), dimension, outcome])
            .inc();
    }

    pub fn inc_rollup_aborts(&self, kind: ObjectKind, dimension: Dimension) {
        self.inner()
            .rollup_aborts
            .with_label_values(&[kind.as_str(), dimension.as_str()])
            .inc();
    }

    pub fn inc_source_errors(&self, kind: ObjectKind, metric: &str) {
        self.inner()
            .source_errors
            .with_label_values(&[kind.as_str(), metric])
            .inc();
    }

    pub fn inc_store_writes(&self, kind: ObjectKind, dimension: Dimension) {
        self.inner()
            .store_writes
            .with_label_values(&[kind.as_str(), dimension.as_str()])
            .inc();
    }

    pub fn set_scopes_discovered(&self, kind: ObjectKind, count: i64) {
        self.inner()
            .scopes_discovered
            .with_label_values(&[kind.as_str()])
            .set(count);
    }
}

/// Structured logger for engine lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, metric_source: &str) {
        info!(
            event = "rollup_started",
            node = %self.node_name,
            version = %version,
            metric_source = %metric_source,
            "Rollup engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "rollup_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Rollup engine shutting down"
        );
    }

    /// Summary of one scheduled pass over every scope
    pub fn log_job_pass(&self, dimension: &str, written: usize, skipped: usize, failed: usize, elapsed_ms: u128) {
        if failed > 0 {
            warn!(
                event = "job_pass",
                node = %self.node_name,
                dimension = %dimension,
                written = written,
                skipped = skipped,
                failed = failed,
                elapsed_ms = elapsed_ms as u64,
                "Job pass finished with failures"
            );
        } else {
            info!(
                event = "job_pass",
                node = %self.node_name,
                dimension = %dimension,
                written = written,
                skipped = skipped,
                elapsed_ms = elapsed_ms as u64,
                "Job pass finished"
            );
        }
    }

    pub fn log_rollup_abort(&self, kind: ObjectKind, dimension: Dimension, scope: &str, bucket: &str, found: usize) {
        error!(
            event = "rollup_aborted",
            node = %self.node_name,
            kind = %kind,
            dimension = %dimension,
            scope = %scope,
            bucket = %bucket,
            found = found,
            "Roll-up source is not a single bucket, nothing written"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollup_metrics_creation() {
        let metrics = RollupMetrics::new();
        metrics.observe_policy_run(ObjectKind::Cluster, "minute", "written", 0.01);
        metrics.inc_rollup_aborts(ObjectKind::Cluster, Dimension::Hour);
        metrics.inc_source_errors(ObjectKind::Workload, "workload_cpu");
        metrics.inc_store_writes(ObjectKind::Namespace, Dimension::Day);
        metrics.set_scopes_discovered(ObjectKind::Project, 3);

        // Clones share the global registry entry
        let clone = metrics.clone();
        clone.inc_store_writes(ObjectKind::Namespace, Dimension::Day);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("rollup-0");
        assert_eq!(logger.node_name, "rollup-0");
    }
}
