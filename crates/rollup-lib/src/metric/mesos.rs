//! Metric getter for Mesos clusters
//!
//! Mesos has neither pod autoscalers nor a cluster autoscaler, so those
//! capabilities always report zero events.

use super::query::{scalar, usage, EngineTemplates, QueryWindow, ResourceTemplates};
use super::{CaEvents, MetricGetter};
use crate::error::SourceError;
use crate::models::{ClusterEngine, ResourceUsage, ScopeKey};
use crate::source::MetricSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

pub const MESOS_TEMPLATES: EngineTemplates = EngineTemplates {
    cluster_cpu: ResourceTemplates {
        request: r#"sum(mesos_task_cpus_limit{{selector}})"#,
        used: r#"sum(mesos_slave_cpus_used{{selector}})"#,
        total: r#"sum(mesos_slave_cpus{{selector}})"#,
    },
    cluster_memory: ResourceTemplates {
        request: r#"sum(mesos_task_mem_limit_bytes{{selector}})"#,
        used: r#"sum(mesos_slave_mem_used_bytes{{selector}})"#,
        total: r#"sum(mesos_slave_mem_bytes{{selector}})"#,
    },
    namespace_cpu: ResourceTemplates {
        request: r#"sum(mesos_task_cpus_limit{{selector}})"#,
        used: r#"sum(rate(mesos_task_cpu_usage_seconds_total{{selector}}[5m]))"#,
        total: r#"sum(mesos_namespace_quota_cpus{{selector}})"#,
    },
    namespace_memory: ResourceTemplates {
        request: r#"sum(mesos_task_mem_limit_bytes{{selector}})"#,
        used: r#"sum(mesos_task_mem_rss_bytes{{selector}})"#,
        total: r#"sum(mesos_namespace_quota_mem_bytes{{selector}})"#,
    },
    workload_cpu: ResourceTemplates {
        request: r#"sum(mesos_task_cpus_limit{{selector}})"#,
        used: r#"sum(rate(mesos_task_cpu_usage_seconds_total{{selector}}[5m]))"#,
        total: r#"sum(mesos_task_cpus_limit{{selector}})"#,
    },
    workload_memory: ResourceTemplates {
        request: r#"sum(mesos_task_mem_limit_bytes{{selector}})"#,
        used: r#"sum(mesos_task_mem_rss_bytes{{selector}})"#,
        total: r#"sum(mesos_task_mem_limit_bytes{{selector}})"#,
    },
    instance_count: r#"count(mesos_task_state{state="TASK_RUNNING",{selector}})"#,
    node_count: r#"count(mesos_slave_uptime_seconds{{selector}})"#,
    rescale_counter: None,
    ca_scale_up_counter: None,
    ca_scale_down_counter: None,
};

/// Getter for Mesos scopes
pub struct MesosMetricGetter {
    source: Arc<dyn MetricSource>,
}

impl MesosMetricGetter {
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl MetricGetter for MesosMetricGetter {
    fn engine(&self) -> ClusterEngine {
        ClusterEngine::Mesos
    }

    async fn cluster_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &MESOS_TEMPLATES.cluster_cpu, scope, window).await
    }

    async fn cluster_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &MESOS_TEMPLATES.cluster_memory, scope, window).await
    }

    async fn namespace_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &MESOS_TEMPLATES.namespace_cpu, scope, window).await
    }

    async fn namespace_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &MESOS_TEMPLATES.namespace_memory, scope, window).await
    }

    async fn workload_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &MESOS_TEMPLATES.workload_cpu, scope, window).await
    }

    async fn workload_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &MESOS_TEMPLATES.workload_memory, scope, window).await
    }

    async fn instance_count(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<f64, SourceError> {
        scalar(self.source.as_ref(), MESOS_TEMPLATES.instance_count, scope, window).await
    }

    async fn node_count(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<f64, SourceError> {
        scalar(self.source.as_ref(), MESOS_TEMPLATES.node_count, scope, window).await
    }

    async fn pod_autoscaler_count(
        &self,
        scope: &ScopeKey,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<u64, SourceError> {
        debug!(scope = %scope.label_selector(), "Mesos has no pod autoscalers");
        Ok(0)
    }

    async fn ca_count(
        &self,
        _scope: &ScopeKey,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<CaEvents, SourceError> {
        Ok(CaEvents::default())
    }
}
