//! Workload advisory policies writing to the public data table

use super::{Policy, PolicyClients, PolicyOutcome};
use crate::error::PolicyError;
use crate::metric::QueryWindow;
use crate::models::{Dimension, JobCommonOpts, ObjectKind, WorkloadMetrics};
use crate::store::PublicDataUpdate;
use async_trait::async_trait;
use tracing::{debug, warn};

fn check_workload(opts: &JobCommonOpts) -> Result<(), PolicyError> {
    if opts.object_kind() != ObjectKind::Workload {
        return Err(PolicyError::KindMismatch {
            expected: ObjectKind::Workload,
            actual: opts.object_kind(),
        });
    }
    Ok(())
}

/// Non-recurring snapshot of a workload's current CPU and memory requests
pub struct WorkloadRequestPolicy;

#[async_trait]
impl Policy for WorkloadRequestPolicy {
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Workload
    }

    fn label(&self) -> &'static str {
        "request-snapshot"
    }

    async fn implement_policy(
        &self,
        opts: &JobCommonOpts,
        clients: &PolicyClients,
    ) -> Result<PolicyOutcome, PolicyError> {
        check_workload(opts)?;
        let getter = clients.getters.for_scope(&opts.scope);
        let window = QueryWindow::Instant(opts.current_time);

        // Zeros would overwrite a good snapshot, so a failed read skips the run
        let cpu = getter.workload_cpu(&opts.scope, &window).await;
        let memory = getter.workload_memory(&opts.scope, &window).await;
        let (cpu, memory) = match (cpu, memory) {
            (Ok(cpu), Ok(memory)) => (cpu, memory),
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    scope = %opts.scope.label_selector(),
                    error = %e,
                    "Request snapshot skipped"
                );
                clients.metrics.inc_source_errors(ObjectKind::Workload, "request_snapshot");
                return Ok(PolicyOutcome::Skipped);
            }
        };

        clients
            .stores
            .public
            .upsert(
                &opts.scope,
                PublicDataUpdate::RequestSnapshot {
                    cpu_request: cpu.request,
                    memory_request: memory.request,
                },
                opts.current_time,
            )
            .await?;
        Ok(PolicyOutcome::Written)
    }
}

/// Daily request suggestion: the prior day's peak usage plus headroom
pub struct WorkloadSuggestionPolicy;

impl WorkloadSuggestionPolicy {
    /// Peak CPU and memory usage over the samples
    fn peaks(samples: &[WorkloadMetrics]) -> (f64, f64) {
        samples.iter().fold((0.0_f64, 0.0_f64), |(cpu, memory), s| {
            (cpu.max(s.cpu.used), memory.max(s.memory.used))
        })
    }

    /// Minute samples of the day, falling back to the day's hour bucket
    async fn day_samples(
        opts: &JobCommonOpts,
        clients: &PolicyClients,
    ) -> Result<(Dimension, Vec<WorkloadMetrics>), PolicyError> {
        let day = Dimension::Day.previous_period(opts.current_time);
        let day_end = day + Dimension::Day.step();
        let table = &clients.stores.workload;

        let minute = table.query_info(&opts.scope, Dimension::Minute, day).await?;
        let samples: Vec<WorkloadMetrics> = minute
            .metrics
            .into_iter()
            .filter(|s| s.time < day_end)
            .collect();
        if !samples.is_empty() {
            return Ok((Dimension::Minute, samples));
        }

        let hour_opts = opts.with_dimension(Dimension::Hour).at(day);
        let buckets = table.get_raw(&hour_opts, &hour_opts.bucket_time()).await?;
        let samples = buckets.into_iter().flat_map(|b| b.metrics).collect();
        Ok((Dimension::Hour, samples))
    }
}

#[async_trait]
impl Policy for WorkloadSuggestionPolicy {
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Workload
    }

    fn label(&self) -> &'static str {
        "suggestion"
    }

    async fn implement_policy(
        &self,
        opts: &JobCommonOpts,
        clients: &PolicyClients,
    ) -> Result<PolicyOutcome, PolicyError> {
        check_workload(opts)?;
        let (source, samples) = Self::day_samples(opts, clients).await?;
        if samples.is_empty() {
            debug!(scope = %opts.scope.label_selector(), "No samples for the previous day, no suggestion");
            return Ok(PolicyOutcome::Skipped);
        }

        let (peak_cpu, peak_memory) = Self::peaks(&samples);
        let factor = 1.0 + clients.suggestion_headroom;
        let day = Dimension::Day.previous_period(opts.current_time);

        clients
            .stores
            .public
            .upsert(
                &opts.scope,
                PublicDataUpdate::Suggestion {
                    suggest_cpu: peak_cpu * factor,
                    suggest_memory: peak_memory * factor,
                    period: Dimension::Day.period_label(day),
                },
                opts.current_time,
            )
            .await?;

        debug!(
            scope = %opts.scope.label_selector(),
            source = %source,
            samples = samples.len(),
            peak_cpu = peak_cpu,
            peak_memory = peak_memory,
            "Suggestion written"
        );
        Ok(PolicyOutcome::Written)
    }
}
