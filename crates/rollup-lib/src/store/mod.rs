//! Bucket store
//!
//! One table per object kind. Each insert lands in the bucket addressed by
//! scope, dimension and bucket time:
//! - a missing bucket is created and seeded with the sample's extrema
//! - an existing bucket widens its running extrema and appends the sample
//!
//! Reads unwind the samples of every bucket of a scope and filter them by a
//! trailing window.

mod bucket;
mod memory;
mod public;
pub mod query;
mod snapshot;

#[cfg(test)]
mod tests;

pub use bucket::{
    Bucket, BucketKey, ClusterData, NamespaceData, PodAutoscalerData, ProjectData, WorkloadData,
};
pub use memory::MemoryBucketTable;
pub use public::{MemoryPublicDataStore, PublicDataStore, PublicDataUpdate};
pub use query::{InfoView, Page, PagedInfo};

use crate::error::StoreError;
use crate::models::{
    ClusterMetrics, Dimension, JobCommonOpts, NamespaceMetrics, ObjectKind, PodAutoscalerMetrics,
    ProjectMetrics, ScopeKey, WorkloadMetrics,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// Element-wise "wider wins" merge of running extrema
pub trait Mergeable: Sized {
    fn merge(existing: Self, incoming: &Self) -> Self;
}

/// A sample that can be stored in a bucket
pub trait BucketSample:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Extrema: Mergeable
        + Clone
        + Debug
        + PartialEq
        + Default
        + Send
        + Sync
        + Serialize
        + DeserializeOwned;

    const KIND: ObjectKind;

    fn time(&self) -> DateTime<Utc>;

    fn extrema(&self) -> &Self::Extrema;

    fn set_extrema(&mut self, extrema: Self::Extrema);

    /// Extrema of this sample alone, labelled with `name` and `period`
    fn point_extrema(&self, name: &str, period: &str) -> Self::Extrema;
}

/// Storage contract of one object kind's buckets
#[async_trait]
pub trait BucketTable<S: BucketSample>: Send + Sync {
    /// Create-or-merge `sample` into the bucket of `opts`
    async fn insert(&self, sample: S, opts: &JobCommonOpts) -> Result<(), StoreError>;

    /// Buckets of exactly `opts.scope` and `opts.dimension`. An empty
    /// `bucket` returns every bucket time.
    async fn get_raw(&self, opts: &JobCommonOpts, bucket: &str) -> Result<Vec<Bucket<S>>, StoreError>;

    /// Samples of one scope at or after `since`
    async fn query_info(
        &self,
        scope: &ScopeKey,
        dimension: Dimension,
        since: DateTime<Utc>,
    ) -> Result<InfoView<S>, StoreError>;

    /// Per-scope views of every scope matching `filter`
    async fn list_info(
        &self,
        filter: &ScopeKey,
        dimension: Dimension,
        since: DateTime<Utc>,
        page: Page,
    ) -> Result<PagedInfo<S>, StoreError>;

    /// Bucket records matching `filter` holding a sample at or after `after`
    async fn count_since(
        &self,
        filter: &ScopeKey,
        dimension: Dimension,
        after: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Persist pending changes, a no-op for tables without persistence
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Every table the policies and the read API work with
#[derive(Clone)]
pub struct Stores {
    pub project: Arc<dyn BucketTable<ProjectMetrics>>,
    pub cluster: Arc<dyn BucketTable<ClusterMetrics>>,
    pub namespace: Arc<dyn BucketTable<NamespaceMetrics>>,
    pub workload: Arc<dyn BucketTable<WorkloadMetrics>>,
    pub pod_autoscaler: Arc<dyn BucketTable<PodAutoscalerMetrics>>,
    pub public: Arc<dyn PublicDataStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            project: Arc::new(MemoryBucketTable::new()),
            cluster: Arc::new(MemoryBucketTable::new()),
            namespace: Arc::new(MemoryBucketTable::new()),
            workload: Arc::new(MemoryBucketTable::new()),
            pod_autoscaler: Arc::new(MemoryBucketTable::new()),
            public: Arc::new(MemoryPublicDataStore::new()),
        }
    }

    /// Tables persisted as one JSON snapshot per kind under `dir`
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let table = |kind: ObjectKind| dir.join(format!("{}.json", kind));
        Ok(Self {
            project: Arc::new(MemoryBucketTable::open(table(ObjectKind::Project))?),
            cluster: Arc::new(MemoryBucketTable::open(table(ObjectKind::Cluster))?),
            namespace: Arc::new(MemoryBucketTable::open(table(ObjectKind::Namespace))?),
            workload: Arc::new(MemoryBucketTable::open(table(ObjectKind::Workload))?),
            pod_autoscaler: Arc::new(MemoryBucketTable::open(table(ObjectKind::PodAutoscaler))?),
            public: Arc::new(MemoryPublicDataStore::open(dir.join("public_data.json"))?),
        })
    }

    /// Workload buckets under `filter` with a sample at or after `after`
    pub async fn workload_count(&self, filter: &ScopeKey, after: DateTime<Utc>) -> Result<u64, StoreError> {
        self.workload
            .count_since(&filter.as_kind(ObjectKind::Workload), Dimension::Minute, after)
            .await
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.project.flush().await?;
        self.cluster.flush().await?;
        self.namespace.flush().await?;
        self.workload.flush().await?;
        self.pod_autoscaler.flush().await?;
        self.public.flush().await
    }
}

/// Picks the table a sample type is stored in
pub trait KindTable: BucketSample {
    fn table(stores: &Stores) -> &Arc<dyn BucketTable<Self>>;
}

impl KindTable for ProjectMetrics {
    fn table(stores: &Stores) -> &Arc<dyn BucketTable<Self>> {
        &stores.project
    }
}

impl KindTable for ClusterMetrics {
    fn table(stores: &Stores) -> &Arc<dyn BucketTable<Self>> {
        &stores.cluster
    }
}

impl KindTable for NamespaceMetrics {
    fn table(stores: &Stores) -> &Arc<dyn BucketTable<Self>> {
        &stores.namespace
    }
}

impl KindTable for WorkloadMetrics {
    fn table(stores: &Stores) -> &Arc<dyn BucketTable<Self>> {
        &stores.workload
    }
}

impl KindTable for PodAutoscalerMetrics {
    fn table(stores: &Stores) -> &Arc<dyn BucketTable<Self>> {
        &stores.pod_autoscaler
    }
}
