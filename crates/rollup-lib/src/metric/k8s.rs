//! Metric getter for Kubernetes clusters

use super::counter::{count_increases, estimate_counter_delta, CounterDeltaConfig};
use super::query::{render, scalar, usage, EngineTemplates, QueryWindow, ResourceTemplates};
use super::{CaEvents, MetricGetter};
use crate::error::SourceError;
use crate::models::{ClusterEngine, ResourceUsage, ScopeKey};
use crate::source::MetricSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const K8S_TEMPLATES: EngineTemplates = EngineTemplates {
    cluster_cpu: ResourceTemplates {
        request: r#"sum(kube_pod_container_resource_requests{resource="cpu",{selector}})"#,
        used: r#"sum(rate(container_cpu_usage_seconds_total{container!="",{selector}}[5m]))"#,
        total: r#"sum(kube_node_status_allocatable{resource="cpu",{selector}})"#,
    },
    cluster_memory: ResourceTemplates {
        request: r#"sum(kube_pod_container_resource_requests{resource="memory",{selector}})"#,
        used: r#"sum(container_memory_working_set_bytes{container!="",{selector}})"#,
        total: r#"sum(kube_node_status_allocatable{resource="memory",{selector}})"#,
    },
    namespace_cpu: ResourceTemplates {
        request: r#"sum(kube_pod_container_resource_requests{resource="cpu",{selector}})"#,
        used: r#"sum(rate(container_cpu_usage_seconds_total{container!="",{selector}}[5m]))"#,
        total: r#"sum(kube_resourcequota{resource="limits.cpu",type="hard",{selector}})"#,
    },
    namespace_memory: ResourceTemplates {
        request: r#"sum(kube_pod_container_resource_requests{resource="memory",{selector}})"#,
        used: r#"sum(container_memory_working_set_bytes{container!="",{selector}})"#,
        total: r#"sum(kube_resourcequota{resource="limits.memory",type="hard",{selector}})"#,
    },
    workload_cpu: ResourceTemplates {
        request: r#"sum(kube_pod_container_resource_requests{resource="cpu",{selector}})"#,
        used: r#"sum(rate(container_cpu_usage_seconds_total{container!="",{selector}}[5m]))"#,
        total: r#"sum(kube_pod_container_resource_limits{resource="cpu",{selector}})"#,
    },
    workload_memory: ResourceTemplates {
        request: r#"sum(kube_pod_container_resource_requests{resource="memory",{selector}})"#,
        used: r#"sum(container_memory_working_set_bytes{container!="",{selector}})"#,
        total: r#"sum(kube_pod_container_resource_limits{resource="memory",{selector}})"#,
    },
    instance_count: r#"count(kube_pod_status_phase{phase="Running",{selector}} == 1)"#,
    node_count: r#"count(kube_node_info{{selector}})"#,
    rescale_counter: Some(r#"sum(pod_autoscaler_successful_rescale_total{{selector}})"#),
    ca_scale_up_counter: Some(r#"sum(cluster_autoscaler_scaled_up_nodes_total{{selector}})"#),
    ca_scale_down_counter: Some(r#"sum(cluster_autoscaler_scaled_down_nodes_total{{selector}})"#),
};

/// Getter for Kubernetes scopes
pub struct K8sMetricGetter {
    source: Arc<dyn MetricSource>,
    counter: CounterDeltaConfig,
}

impl K8sMetricGetter {
    pub fn new(source: Arc<dyn MetricSource>, counter: CounterDeltaConfig) -> Self {
        Self { source, counter }
    }

    async fn counter_increase(
        &self,
        template: &str,
        scope: &ScopeKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, SourceError> {
        let query = render(template, scope);
        let range = self
            .source
            .query_range(&query, from, to, self.counter.step)
            .await?;
        Ok(count_increases(&range, from, to, self.counter.step))
    }
}

#[async_trait]
impl MetricGetter for K8sMetricGetter {
    fn engine(&self) -> ClusterEngine {
        ClusterEngine::K8s
    }

    async fn cluster_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &K8S_TEMPLATES.cluster_cpu, scope, window).await
    }

    async fn cluster_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &K8S_TEMPLATES.cluster_memory, scope, window).await
    }

    async fn namespace_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &K8S_TEMPLATES.namespace_cpu, scope, window).await
    }

    async fn namespace_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &K8S_TEMPLATES.namespace_memory, scope, window).await
    }

    async fn workload_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &K8S_TEMPLATES.workload_cpu, scope, window).await
    }

    async fn workload_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError> {
        usage(self.source.as_ref(), &K8S_TEMPLATES.workload_memory, scope, window).await
    }

    async fn instance_count(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<f64, SourceError> {
        scalar(self.source.as_ref(), K8S_TEMPLATES.instance_count, scope, window).await
    }

    async fn node_count(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<f64, SourceError> {
        scalar(self.source.as_ref(), K8S_TEMPLATES.node_count, scope, window).await
    }

    async fn pod_autoscaler_count(
        &self,
        scope: &ScopeKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, SourceError> {
        let Some(template) = K8S_TEMPLATES.rescale_counter else {
            return Ok(0);
        };
        let counter = render(template, scope);
        estimate_counter_delta(self.source.as_ref(), &counter, from, to, &self.counter).await
    }

    async fn ca_count(
        &self,
        scope: &ScopeKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<CaEvents, SourceError> {
        let mut events = CaEvents::default();
        if let Some(template) = K8S_TEMPLATES.ca_scale_up_counter {
            events.scale_up = self.counter_increase(template, scope, from, to).await?;
        }
        if let Some(template) = K8S_TEMPLATES.ca_scale_down_counter {
            events.scale_down = self.counter_increase(template, scope, from, to).await?;
        }
        Ok(events)
    }
}
