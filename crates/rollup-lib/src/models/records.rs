//! Per-kind samples and their running extrema

use super::ObjectKind;
use crate::store::{BucketSample, Mergeable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A labelled min/max observation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtremumRecord {
    /// Object the observation belongs to
    pub name: String,
    pub metric_name: String,
    pub value: f64,
    /// Period label of the observation
    pub period: String,
}

impl ExtremumRecord {
    pub fn new(
        name: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
        period: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            metric_name: metric_name.into(),
            value,
            period: period.into(),
        }
    }
}

/// Running minimum and maximum of one metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: ExtremumRecord,
    pub max: ExtremumRecord,
}

impl MinMax {
    /// A single observation is trivially both the min and the max
    pub fn point(name: &str, metric_name: &str, value: f64, period: &str) -> Self {
        let record = ExtremumRecord::new(name, metric_name, value, period);
        Self {
            min: record.clone(),
            max: record,
        }
    }

    /// Keep the more extreme record on each side. On equal values the
    /// earlier period wins, so the result does not depend on merge order.
    pub fn widen(&mut self, incoming: &MinMax) {
        let earlier = |a: &ExtremumRecord, b: &ExtremumRecord| a.period < b.period;
        if incoming.max.value > self.max.value
            || (incoming.max.value == self.max.value && earlier(&incoming.max, &self.max))
        {
            self.max = incoming.max.clone();
        }
        if incoming.min.value < self.min.value
            || (incoming.min.value == self.min.value && earlier(&incoming.min, &self.min))
        {
            self.min = incoming.min.clone();
        }
    }
}

/// Request, usage and capacity of one resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub request: f64,
    pub used: f64,
    pub total: f64,
}

impl ResourceUsage {
    pub fn usage_ratio(&self) -> f64 {
        if self.total > 0.0 {
            self.used / self.total
        } else {
            0.0
        }
    }
}

pub mod metric_names {
    pub const CPU_USAGE_RATIO: &str = "cpu_usage_ratio";
    pub const MEMORY_USAGE_RATIO: &str = "memory_usage_ratio";
    pub const CPU_USED: &str = "cpu_used";
    pub const MEMORY_USED: &str = "memory_used";
    pub const INSTANCE_COUNT: &str = "instance_count";
    pub const NODE_COUNT: &str = "node_count";
    pub const REPLICAS: &str = "replicas";
    pub const RESCALE_COUNT: &str = "rescale_count";
}

use metric_names::*;

/// Extrema tracked for projects and clusters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityExtrema {
    pub cpu_ratio: MinMax,
    pub memory_ratio: MinMax,
    pub instance: MinMax,
    pub node: MinMax,
}

impl Mergeable for CapacityExtrema {
    fn merge(mut existing: Self, incoming: &Self) -> Self {
        existing.cpu_ratio.widen(&incoming.cpu_ratio);
        existing.memory_ratio.widen(&incoming.memory_ratio);
        existing.instance.widen(&incoming.instance);
        existing.node.widen(&incoming.node);
        existing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceExtrema {
    pub cpu_ratio: MinMax,
    pub memory_ratio: MinMax,
    pub instance: MinMax,
}

impl Mergeable for NamespaceExtrema {
    fn merge(mut existing: Self, incoming: &Self) -> Self {
        existing.cpu_ratio.widen(&incoming.cpu_ratio);
        existing.memory_ratio.widen(&incoming.memory_ratio);
        existing.instance.widen(&incoming.instance);
        existing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadExtrema {
    pub cpu_used: MinMax,
    pub memory_used: MinMax,
    pub instance: MinMax,
}

impl Mergeable for WorkloadExtrema {
    fn merge(mut existing: Self, incoming: &Self) -> Self {
        existing.cpu_used.widen(&incoming.cpu_used);
        existing.memory_used.widen(&incoming.memory_used);
        existing.instance.widen(&incoming.instance);
        existing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodAutoscalerExtrema {
    pub replicas: MinMax,
    pub rescale: MinMax,
}

impl Mergeable for PodAutoscalerExtrema {
    fn merge(mut existing: Self, incoming: &Self) -> Self {
        existing.replicas.widen(&incoming.replicas);
        existing.rescale.widen(&incoming.rescale);
        existing
    }
}

/// One project sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetrics {
    pub time: DateTime<Utc>,
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    pub instance_count: f64,
    pub node_count: f64,
    pub workload_count: u64,
    #[serde(default)]
    pub extrema: CapacityExtrema,
}

impl BucketSample for ProjectMetrics {
    type Extrema = CapacityExtrema;
    const KIND: ObjectKind = ObjectKind::Project;

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn extrema(&self) -> &CapacityExtrema {
        &self.extrema
    }

    fn set_extrema(&mut self, extrema: CapacityExtrema) {
        self.extrema = extrema;
    }

    fn point_extrema(&self, name: &str, period: &str) -> CapacityExtrema {
        CapacityExtrema {
            cpu_ratio: MinMax::point(name, CPU_USAGE_RATIO, self.cpu.usage_ratio(), period),
            memory_ratio: MinMax::point(name, MEMORY_USAGE_RATIO, self.memory.usage_ratio(), period),
            instance: MinMax::point(name, INSTANCE_COUNT, self.instance_count, period),
            node: MinMax::point(name, NODE_COUNT, self.node_count, period),
        }
    }
}

/// One cluster sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub time: DateTime<Utc>,
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    pub instance_count: f64,
    pub node_count: f64,
    pub available_node_count: u64,
    /// Cluster autoscaler scale-up events in the sampled period
    pub ca_scale_up: u64,
    /// Cluster autoscaler scale-down events in the sampled period
    pub ca_scale_down: u64,
    pub workload_count: u64,
    #[serde(default)]
    pub extrema: CapacityExtrema,
}

impl BucketSample for ClusterMetrics {
    type Extrema = CapacityExtrema;
    const KIND: ObjectKind = ObjectKind::Cluster;

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn extrema(&self) -> &CapacityExtrema {
        &self.extrema
    }

    fn set_extrema(&mut self, extrema: CapacityExtrema) {
        self.extrema = extrema;
    }

    fn point_extrema(&self, name: &str, period: &str) -> CapacityExtrema {
        CapacityExtrema {
            cpu_ratio: MinMax::point(name, CPU_USAGE_RATIO, self.cpu.usage_ratio(), period),
            memory_ratio: MinMax::point(name, MEMORY_USAGE_RATIO, self.memory.usage_ratio(), period),
            instance: MinMax::point(name, INSTANCE_COUNT, self.instance_count, period),
            node: MinMax::point(name, NODE_COUNT, self.node_count, period),
        }
    }
}

/// One namespace sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceMetrics {
    pub time: DateTime<Utc>,
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    pub instance_count: f64,
    pub workload_count: u64,
    #[serde(default)]
    pub extrema: NamespaceExtrema,
}

impl BucketSample for NamespaceMetrics {
    type Extrema = NamespaceExtrema;
    const KIND: ObjectKind = ObjectKind::Namespace;

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn extrema(&self) -> &NamespaceExtrema {
        &self.extrema
    }

    fn set_extrema(&mut self, extrema: NamespaceExtrema) {
        self.extrema = extrema;
    }

    fn point_extrema(&self, name: &str, period: &str) -> NamespaceExtrema {
        NamespaceExtrema {
            cpu_ratio: MinMax::point(name, CPU_USAGE_RATIO, self.cpu.usage_ratio(), period),
            memory_ratio: MinMax::point(name, MEMORY_USAGE_RATIO, self.memory.usage_ratio(), period),
            instance: MinMax::point(name, INSTANCE_COUNT, self.instance_count, period),
        }
    }
}

/// One workload sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadMetrics {
    pub time: DateTime<Utc>,
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    pub instance_count: f64,
    #[serde(default)]
    pub extrema: WorkloadExtrema,
}

impl BucketSample for WorkloadMetrics {
    type Extrema = WorkloadExtrema;
    const KIND: ObjectKind = ObjectKind::Workload;

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn extrema(&self) -> &WorkloadExtrema {
        &self.extrema
    }

    fn set_extrema(&mut self, extrema: WorkloadExtrema) {
        self.extrema = extrema;
    }

    fn point_extrema(&self, name: &str, period: &str) -> WorkloadExtrema {
        WorkloadExtrema {
            cpu_used: MinMax::point(name, CPU_USED, self.cpu.used, period),
            memory_used: MinMax::point(name, MEMORY_USED, self.memory.used, period),
            instance: MinMax::point(name, INSTANCE_COUNT, self.instance_count, period),
        }
    }
}

/// One pod autoscaler sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodAutoscalerMetrics {
    pub time: DateTime<Utc>,
    pub current_replicas: f64,
    /// Successful rescales in the sampled period
    pub rescale_count: u64,
    #[serde(default)]
    pub extrema: PodAutoscalerExtrema,
}

impl BucketSample for PodAutoscalerMetrics {
    type Extrema = PodAutoscalerExtrema;
    const KIND: ObjectKind = ObjectKind::PodAutoscaler;

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn extrema(&self) -> &PodAutoscalerExtrema {
        &self.extrema
    }

    fn set_extrema(&mut self, extrema: PodAutoscalerExtrema) {
        self.extrema = extrema;
    }

    fn point_extrema(&self, name: &str, period: &str) -> PodAutoscalerExtrema {
        PodAutoscalerExtrema {
            replicas: MinMax::point(name, REPLICAS, self.current_replicas, period),
            rescale: MinMax::point(name, RESCALE_COUNT, self.rescale_count as f64, period),
        }
    }
}

/// Derived advisory metrics for one object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicMetrics {
    pub suggest_cpu: f64,
    pub suggest_memory: f64,
    pub cpu_request: f64,
    pub memory_request: f64,
    /// Period the suggestion was computed from
    pub period: String,
}

/// Kind-agnostic side record keyed by scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicData {
    pub scope: super::ScopeKey,
    pub object_kind: ObjectKind,
    pub metrics: PublicMetrics,
    pub update_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widen_keeps_more_extreme() {
        let mut running = MinMax::point("c1", NODE_COUNT, 10.0, "t0");
        running.widen(&MinMax::point("c1", NODE_COUNT, 12.0, "t1"));
        running.widen(&MinMax::point("c1", NODE_COUNT, 8.0, "t2"));
        running.widen(&MinMax::point("c1", NODE_COUNT, 11.0, "t3"));

        assert_eq!(running.max.value, 12.0);
        assert_eq!(running.max.period, "t1");
        assert_eq!(running.min.value, 8.0);
        assert_eq!(running.min.period, "t2");
    }

    #[test]
    fn test_widen_tie_prefers_earlier_period() {
        let mut forward = MinMax::point("c1", NODE_COUNT, 5.0, "2024-03-01 10:00");
        forward.widen(&MinMax::point("c1", NODE_COUNT, 5.0, "2024-03-01 10:03"));

        let mut backward = MinMax::point("c1", NODE_COUNT, 5.0, "2024-03-01 10:03");
        backward.widen(&MinMax::point("c1", NODE_COUNT, 5.0, "2024-03-01 10:00"));

        assert_eq!(forward.max.period, "2024-03-01 10:00");
        assert_eq!(forward.min.period, "2024-03-01 10:00");
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_usage_ratio_handles_zero_total() {
        let usage = ResourceUsage {
            request: 1.0,
            used: 2.0,
            total: 0.0,
        };
        assert_eq!(usage.usage_ratio(), 0.0);

        let usage = ResourceUsage {
            request: 1.0,
            used: 2.0,
            total: 8.0,
        };
        assert_eq!(usage.usage_ratio(), 0.25);
    }

    #[test]
    fn test_point_extrema_uses_own_values() {
        let sample = WorkloadMetrics {
            time: Utc::now(),
            cpu: ResourceUsage {
                request: 1.0,
                used: 0.4,
                total: 2.0,
            },
            memory: ResourceUsage::default(),
            instance_count: 3.0,
            extrema: WorkloadExtrema::default(),
        };

        let extrema = sample.point_extrema("api", "2024-03-05 14:07");
        assert_eq!(extrema.cpu_used.min, extrema.cpu_used.max);
        assert_eq!(extrema.cpu_used.max.value, 0.4);
        assert_eq!(extrema.instance.max.value, 3.0);
        assert_eq!(extrema.instance.max.name, "api");
        assert_eq!(extrema.instance.max.period, "2024-03-05 14:07");
    }
}
