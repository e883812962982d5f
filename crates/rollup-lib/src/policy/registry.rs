//! Lookup of the policy for an object kind and trigger

use super::{
    ClusterSampler, KindSampler, MinutePolicy, NamespaceSampler, PodAutoscalerSampler, Policy,
    ProjectSampler, RollupPolicy, WorkloadRequestPolicy, WorkloadSampler, WorkloadSuggestionPolicy,
};
use crate::models::{Dimension, ObjectKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What makes a policy run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTrigger {
    /// The recurring schedule of a dimension
    Dimension(Dimension),
    /// Once, when a workload is first seen
    RequestSnapshot,
    /// Daily, after the day roll-ups
    Suggestion,
}

/// Built once at startup and shared by reference
pub struct PolicyRegistry {
    policies: HashMap<(ObjectKind, PolicyTrigger), Arc<dyn Policy>>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyRegistry {
    /// Registry with every built-in policy
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_dimensions(ProjectSampler);
        registry.register_dimensions(ClusterSampler);
        registry.register_dimensions(NamespaceSampler);
        registry.register_dimensions(WorkloadSampler);
        registry.register_dimensions(PodAutoscalerSampler);
        registry.register(
            ObjectKind::Workload,
            PolicyTrigger::RequestSnapshot,
            Arc::new(WorkloadRequestPolicy),
        );
        registry.register(
            ObjectKind::Workload,
            PolicyTrigger::Suggestion,
            Arc::new(WorkloadSuggestionPolicy),
        );
        registry
    }

    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: ObjectKind, trigger: PolicyTrigger, policy: Arc<dyn Policy>) {
        self.policies.insert((kind, trigger), policy);
    }

    /// Minute, hour and day policies of one kind
    fn register_dimensions<K: KindSampler + Clone>(&mut self, sampler: K) {
        let kind = <K::Sample as crate::store::BucketSample>::KIND;
        self.register(
            kind,
            PolicyTrigger::Dimension(Dimension::Minute),
            Arc::new(MinutePolicy::new(sampler.clone())),
        );
        for dimension in [Dimension::Hour, Dimension::Day] {
            // Hour and day always have a finer dimension
            if let Ok(policy) = RollupPolicy::new(sampler.clone(), dimension) {
                self.register(kind, PolicyTrigger::Dimension(dimension), Arc::new(policy));
            }
        }
    }

    pub fn get(&self, kind: ObjectKind, dimension: Dimension) -> Option<Arc<dyn Policy>> {
        self.get_trigger(kind, PolicyTrigger::Dimension(dimension))
    }

    pub fn get_trigger(&self, kind: ObjectKind, trigger: PolicyTrigger) -> Option<Arc<dyn Policy>> {
        self.policies.get(&(kind, trigger)).cloned()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
