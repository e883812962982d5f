//! Bucket documents and the create-or-merge step applied on every insert

use super::{BucketSample, Mergeable};
use crate::models::{
    ClusterMetrics, Dimension, NamespaceMetrics, PodAutoscalerMetrics, ProjectMetrics, ScopeKey,
    WorkloadMetrics,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique key of a bucket: one per scope, dimension and bucket time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub scope: ScopeKey,
    pub dimension: Dimension,
    pub bucket_time: String,
}

/// Accumulated samples of one dimension plus their running extrema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "S: BucketSample", deserialize = "S: BucketSample"))]
pub struct Bucket<S: BucketSample> {
    pub key: BucketKey,
    pub metrics: Vec<S>,
    pub extrema: S::Extrema,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

pub type ProjectData = Bucket<ProjectMetrics>;
pub type ClusterData = Bucket<ClusterMetrics>;
pub type NamespaceData = Bucket<NamespaceMetrics>;
pub type WorkloadData = Bucket<WorkloadMetrics>;
pub type PodAutoscalerData = Bucket<PodAutoscalerMetrics>;

impl<S: BucketSample> Bucket<S> {
    /// Seed a new bucket: the first sample's extrema become the bucket's
    pub fn create(key: BucketKey, sample: S, now: DateTime<Utc>) -> Self {
        Self {
            key,
            extrema: sample.extrema().clone(),
            metrics: vec![sample],
            create_time: now,
            update_time: now,
        }
    }

    /// Widen the running extrema with the sample's and append it
    pub fn absorb(&mut self, sample: S, now: DateTime<Utc>) {
        let running = std::mem::take(&mut self.extrema);
        self.extrema = S::Extrema::merge(running, sample.extrema());
        self.metrics.push(sample);
        self.update_time = now;
    }

    /// True when any sample was taken at or after `after`
    pub fn has_sample_since(&self, after: DateTime<Utc>) -> bool {
        self.metrics.iter().any(|m| m.time() >= after)
    }

    /// Samples taken at or after `since`
    pub fn samples_since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &S> {
        self.metrics.iter().filter(move |m| m.time() >= since)
    }
}
