//! Job driver
//!
//! Runs the minute schedule on a ticker. When a tick crosses an hour or day
//! boundary the hour and day roll-ups (and the daily suggestions) run after
//! the minute pass. Runs fan out across scopes under a semaphore.

use crate::discovery::collect_scopes;
use crate::error::PolicyError;
use crate::health::{components, HealthRegistry};
use crate::models::{Dimension, JobCommonOpts, ObjectKind, ScopeKey};
use crate::observability::StructuredLogger;
use crate::policy::{PolicyClients, PolicyOutcome, PolicyRegistry, PolicyTrigger};
use crate::source::MetricSource;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Query used to probe the metric source once per tick
const PROBE_QUERY: &str = "vector(1)";

#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Minute schedule tick
    pub tick_interval: Duration,
    /// Concurrent policy runs per pass
    pub concurrency: usize,
    /// Concurrent discovery listings
    pub discovery_concurrency: usize,
    /// Re-discover scopes every N ticks
    pub discovery_every: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            concurrency: 32,
            discovery_concurrency: 32,
            discovery_every: 5,
        }
    }
}

/// Tally of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PassSummary {
    fn add(&mut self, other: PassSummary) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Dimensions due at `now` given the previous tick. The first tick only
/// samples minutes since no finer data exists yet to roll up.
pub fn due_dimensions(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Vec<Dimension> {
    let mut due = vec![Dimension::Minute];
    let Some(previous) = previous else {
        return due;
    };
    for dimension in [Dimension::Hour, Dimension::Day] {
        if dimension.period_start(previous) != dimension.period_start(now) {
            due.push(dimension);
        }
    }
    due
}

pub struct JobDriver {
    registry: Arc<PolicyRegistry>,
    clients: PolicyClients,
    health: HealthRegistry,
    logger: StructuredLogger,
    probe: Option<Arc<dyn MetricSource>>,
    config: JobConfig,
    scopes: Vec<ScopeKey>,
    snapshotted: HashSet<ScopeKey>,
    last_tick: Option<DateTime<Utc>>,
}

impl JobDriver {
    pub fn new(
        registry: Arc<PolicyRegistry>,
        clients: PolicyClients,
        health: HealthRegistry,
        logger: StructuredLogger,
        config: JobConfig,
    ) -> Self {
        Self {
            registry,
            clients,
            health,
            logger,
            probe: None,
            config,
            scopes: Vec::new(),
            snapshotted: HashSet::new(),
            last_tick: None,
        }
    }

    pub fn scopes(&self) -> &[ScopeKey] {
        &self.scopes
    }

    /// Replace the scope list, e.g. for a fixed topology or a backfill
    pub fn set_scopes(&mut self, mut scopes: Vec<ScopeKey>) {
        scopes.sort();
        scopes.dedup();
        self.scopes = scopes;
    }

    pub async fn refresh_scopes(&mut self) {
        let scopes = collect_scopes(self.clients.discovery.clone(), self.config.discovery_concurrency).await;

        for kind in ObjectKind::ALL {
            let count = scopes.iter().filter(|s| s.object_kind == kind).count();
            self.clients.metrics.set_scopes_discovered(kind, count as i64);
        }

        if scopes.is_empty() {
            // Keep the previous topology rather than stopping all jobs
            self.health
                .report_failure(components::DISCOVERY, "discovery returned no scopes")
                .await;
            return;
        }
        self.health.report_success(components::DISCOVERY).await;
        self.set_scopes(scopes);
    }

    /// Run loop. Stops when `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            concurrency = self.config.concurrency,
            "Starting job driver"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if ticks % self.config.discovery_every.max(1) == 0 {
                        self.refresh_scopes().await;
                    }
                    ticks += 1;

                    self.tick(Utc::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down job driver");
                    break;
                }
            }
        }

        if let Err(e) = self.clients.stores.flush().await {
            warn!(error = %e, "Final store flush failed");
        }
    }

    /// One scheduler tick at `now`
    pub async fn tick(&mut self, now: DateTime<Utc>) -> PassSummary {
        self.probe_source(now).await;

        let mut summary = PassSummary::default();
        summary.add(self.run_snapshots(now).await);
        for dimension in due_dimensions(self.last_tick, now) {
            summary.add(self.run_once(now, dimension).await);
        }
        self.last_tick = Some(now);

        let flushed = self.clients.stores.flush().await;
        self.health.observe(components::STORE, &flushed).await;

        if summary.failed > 0 {
            self.health
                .report_failure(components::JOB_DRIVER, format!("{} policy runs failed", summary.failed))
                .await;
        } else {
            self.health.report_success(components::JOB_DRIVER).await;
        }
        self.health.set_ready(true).await;
        summary
    }

    /// Run every policy of `dimension` for all scopes. The day pass also
    /// refreshes workload suggestions.
    pub async fn run_once(&self, now: DateTime<Utc>, dimension: Dimension) -> PassSummary {
        let mut summary = self
            .run_pass(now, dimension, PolicyTrigger::Dimension(dimension), &self.scopes)
            .await;
        if dimension == Dimension::Day {
            summary.add(
                self.run_pass(now, dimension, PolicyTrigger::Suggestion, &self.scopes)
                    .await,
            );
        }
        summary
    }

    /// Request snapshots for workloads not seen before
    async fn run_snapshots(&mut self, now: DateTime<Utc>) -> PassSummary {
        let fresh: Vec<ScopeKey> = self
            .scopes
            .iter()
            .filter(|s| s.object_kind == ObjectKind::Workload && !self.snapshotted.contains(*s))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return PassSummary::default();
        }

        let summary = self
            .run_pass(now, Dimension::Minute, PolicyTrigger::RequestSnapshot, &fresh)
            .await;
        // Snapshots are taken once; a failed one is not retried
        self.snapshotted.extend(fresh);
        summary
    }

    async fn probe_source(&self, now: DateTime<Utc>) {
        if let Some(probe) = &self.probe {
            let result = probe.query(PROBE_QUERY, now).await;
            self.health.observe(components::METRIC_SOURCE, &result).await;
        }
    }

    async fn run_pass(
        &self,
        now: DateTime<Utc>,
        dimension: Dimension,
        trigger: PolicyTrigger,
        scopes: &[ScopeKey],
    ) -> PassSummary {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for scope in scopes {
            let Some(policy) = self.registry.get_trigger(scope.object_kind, trigger) else {
                continue;
            };
            let semaphore = semaphore.clone();
            let clients = self.clients.clone();
            let logger = self.logger.clone();
            let opts = JobCommonOpts::new(scope.clone(), dimension, now);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let run_started = Instant::now();
                let result = policy.implement_policy(&opts, &clients).await;
                let elapsed = run_started.elapsed().as_secs_f64();

                let outcome = match &result {
                    Ok(outcome) => outcome.as_str(),
                    Err(_) => "failed",
                };
                clients
                    .metrics
                    .observe_policy_run(opts.object_kind(), policy.label(), outcome, elapsed);

                if let Err(e) = &result {
                    match e {
                        PolicyError::RollupSourceNotSingular {
                            kind,
                            dimension,
                            bucket,
                            found,
                            ..
                        } => logger.log_rollup_abort(*kind, *dimension, &opts.scope.label_selector(), bucket, *found),
                        other => warn!(
                            kind = %opts.object_kind(),
                            policy = policy.label(),
                            scope = %opts.scope.label_selector(),
                            error = %other,
                            "Policy run failed"
                        ),
                    }
                }
                Some(result.ok())
            });
        }

        let mut summary = PassSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(Some(PolicyOutcome::Written))) => summary.written += 1,
                Ok(Some(Some(PolicyOutcome::Skipped))) => summary.skipped += 1,
                Ok(Some(None)) => summary.failed += 1,
                // Semaphore closed: the run never started
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    warn!(error = %e, "Policy task panicked");
                    summary.failed += 1;
                }
            }
        }

        let label = match trigger {
            PolicyTrigger::Dimension(d) => d.as_str(),
            PolicyTrigger::RequestSnapshot => "request-snapshot",
            PolicyTrigger::Suggestion => "suggestion",
        };
        self.logger.log_job_pass(
            label,
            summary.written,
            summary.skipped,
            summary.failed,
            started.elapsed().as_millis(),
        );
        debug!(trigger = label, scopes = scopes.len(), "Pass complete");
        summary
    }
}

/// Builder for the job driver
pub struct JobDriverBuilder {
    registry: Option<Arc<PolicyRegistry>>,
    clients: Option<PolicyClients>,
    health: HealthRegistry,
    logger: Option<StructuredLogger>,
    probe: Option<Arc<dyn MetricSource>>,
    config: JobConfig,
    scopes: Vec<ScopeKey>,
}

impl Default for JobDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobDriverBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            clients: None,
            health: HealthRegistry::new(),
            logger: None,
            probe: None,
            config: JobConfig::default(),
            scopes: Vec::new(),
        }
    }

    pub fn registry(mut self, registry: Arc<PolicyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn clients(mut self, clients: PolicyClients) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Metric source probed once per tick for the health endpoint
    pub fn probe(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.probe = Some(source);
        self
    }

    pub fn config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Initial scopes, used until the first discovery pass succeeds
    pub fn scopes(mut self, scopes: Vec<ScopeKey>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn build(self) -> Result<JobDriver> {
        let clients = self
            .clients
            .ok_or_else(|| anyhow::anyhow!("Policy clients are required"))?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(PolicyRegistry::new()));
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("rollup"));

        let mut driver = JobDriver::new(registry, clients, self.health, logger, self.config);
        driver.probe = self.probe;
        driver.set_scopes(self.scopes);
        Ok(driver)
    }
}
