//! Per-kind samplers
//!
//! Getter, discovery and count failures are logged and the affected value
//! is left at zero. A sample is always produced.

use super::{PolicyClients, SampleWindow};
use crate::discovery::available_nodes;
use crate::metric::CaEvents;
use crate::models::{
    ClusterMetrics, NamespaceMetrics, PodAutoscalerMetrics, ProjectMetrics, ResourceUsage, ScopeKey,
    WorkloadMetrics,
};
use crate::store::KindTable;
use async_trait::async_trait;
use std::fmt::Display;
use tracing::warn;

/// Produces the sample of one object kind for a window
#[async_trait]
pub trait KindSampler: Send + Sync + 'static {
    type Sample: KindTable;

    async fn sample(&self, scope: &ScopeKey, window: &SampleWindow, clients: &PolicyClients) -> Self::Sample;
}

fn or_zero<T: Default, E: Display>(
    result: Result<T, E>,
    scope: &ScopeKey,
    metric: &'static str,
    clients: &PolicyClients,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(
                kind = %scope.object_kind,
                scope = %scope.label_selector(),
                metric = metric,
                error = %e,
                "Sampling failed, value left at zero"
            );
            clients.metrics.inc_source_errors(scope.object_kind, metric);
            T::default()
        }
    }
}

fn add(a: ResourceUsage, b: ResourceUsage) -> ResourceUsage {
    ResourceUsage {
        request: a.request + b.request,
        used: a.used + b.used,
        total: a.total + b.total,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectSampler;

/// A project is the sum of its clusters
#[async_trait]
impl KindSampler for ProjectSampler {
    type Sample = ProjectMetrics;

    async fn sample(&self, scope: &ScopeKey, window: &SampleWindow, clients: &PolicyClients) -> ProjectMetrics {
        let query = window.query_window();
        let mut sample = ProjectMetrics {
            time: window.period,
            cpu: ResourceUsage::default(),
            memory: ResourceUsage::default(),
            instance_count: 0.0,
            node_count: 0.0,
            workload_count: 0,
            extrema: Default::default(),
        };

        let clusters = or_zero(
            clients.discovery.list_clusters(&scope.project_id).await,
            scope,
            "clusters",
            clients,
        );
        for cluster in clusters {
            let cluster = ScopeKey::cluster(&scope.project_id, cluster.id, cluster.engine);
            let getter = clients.getters.for_scope(&cluster);

            sample.cpu = add(sample.cpu, or_zero(getter.cluster_cpu(&cluster, &query).await, scope, "cluster_cpu", clients));
            sample.memory = add(
                sample.memory,
                or_zero(getter.cluster_memory(&cluster, &query).await, scope, "cluster_memory", clients),
            );
            sample.instance_count += or_zero(getter.instance_count(&cluster, &query).await, scope, "instance_count", clients);
            sample.node_count += or_zero(getter.node_count(&cluster, &query).await, scope, "node_count", clients);
        }

        sample.workload_count = or_zero(
            clients.stores.workload_count(scope, window.start).await,
            scope,
            "workload_count",
            clients,
        );
        sample
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterSampler;

#[async_trait]
impl KindSampler for ClusterSampler {
    type Sample = ClusterMetrics;

    async fn sample(&self, scope: &ScopeKey, window: &SampleWindow, clients: &PolicyClients) -> ClusterMetrics {
        let query = window.query_window();
        let getter = clients.getters.for_scope(scope);

        let nodes = or_zero(
            clients.discovery.list_nodes_in_cluster(&scope.cluster_id).await,
            scope,
            "available_nodes",
            clients,
        );
        let ca: CaEvents = or_zero(getter.ca_count(scope, window.start, window.end).await, scope, "ca_count", clients);

        ClusterMetrics {
            time: window.period,
            cpu: or_zero(getter.cluster_cpu(scope, &query).await, scope, "cluster_cpu", clients),
            memory: or_zero(getter.cluster_memory(scope, &query).await, scope, "cluster_memory", clients),
            instance_count: or_zero(getter.instance_count(scope, &query).await, scope, "instance_count", clients),
            node_count: or_zero(getter.node_count(scope, &query).await, scope, "node_count", clients),
            available_node_count: available_nodes(&nodes),
            ca_scale_up: ca.scale_up,
            ca_scale_down: ca.scale_down,
            workload_count: or_zero(
                clients.stores.workload_count(scope, window.start).await,
                scope,
                "workload_count",
                clients,
            ),
            extrema: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceSampler;

#[async_trait]
impl KindSampler for NamespaceSampler {
    type Sample = NamespaceMetrics;

    async fn sample(&self, scope: &ScopeKey, window: &SampleWindow, clients: &PolicyClients) -> NamespaceMetrics {
        let query = window.query_window();
        let getter = clients.getters.for_scope(scope);

        NamespaceMetrics {
            time: window.period,
            cpu: or_zero(getter.namespace_cpu(scope, &query).await, scope, "namespace_cpu", clients),
            memory: or_zero(getter.namespace_memory(scope, &query).await, scope, "namespace_memory", clients),
            instance_count: or_zero(getter.instance_count(scope, &query).await, scope, "instance_count", clients),
            workload_count: or_zero(
                clients.stores.workload_count(scope, window.start).await,
                scope,
                "workload_count",
                clients,
            ),
            extrema: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadSampler;

#[async_trait]
impl KindSampler for WorkloadSampler {
    type Sample = WorkloadMetrics;

    async fn sample(&self, scope: &ScopeKey, window: &SampleWindow, clients: &PolicyClients) -> WorkloadMetrics {
        let query = window.query_window();
        let getter = clients.getters.for_scope(scope);

        WorkloadMetrics {
            time: window.period,
            cpu: or_zero(getter.workload_cpu(scope, &query).await, scope, "workload_cpu", clients),
            memory: or_zero(getter.workload_memory(scope, &query).await, scope, "workload_memory", clients),
            instance_count: or_zero(getter.instance_count(scope, &query).await, scope, "instance_count", clients),
            extrema: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PodAutoscalerSampler;

#[async_trait]
impl KindSampler for PodAutoscalerSampler {
    type Sample = PodAutoscalerMetrics;

    async fn sample(&self, scope: &ScopeKey, window: &SampleWindow, clients: &PolicyClients) -> PodAutoscalerMetrics {
        let query = window.query_window();
        let getter = clients.getters.for_scope(scope);

        PodAutoscalerMetrics {
            time: window.period,
            current_replicas: or_zero(getter.instance_count(scope, &query).await, scope, "replicas", clients),
            rescale_count: or_zero(
                getter.pod_autoscaler_count(scope, window.start, window.end).await,
                scope,
                "rescale_count",
                clients,
            ),
            extrema: Default::default(),
        }
    }
}
