//! In-memory bucket table with optional JSON snapshot persistence
//!
//! Buckets are never pruned here. Each flush rewrites the whole snapshot,
//! so it grows until an external retention job trims old buckets.

use super::query::{InfoView, Page, PagedInfo};
use super::{snapshot, Bucket, BucketKey, BucketSample, BucketTable};
use crate::error::StoreError;
use crate::models::{Dimension, JobCommonOpts, ScopeKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Bucket table backed by a concurrent map keyed by the unique bucket key.
///
/// Create-or-merge runs while holding the key's map entry, so two writers
/// hitting the same bucket both land their samples.
pub struct MemoryBucketTable<S: BucketSample> {
    buckets: DashMap<BucketKey, Bucket<S>>,
    persistence_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl<S: BucketSample> Default for MemoryBucketTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BucketSample> MemoryBucketTable<S> {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            persistence_path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Open a table persisted at `path`, loading the previous snapshot if any
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = Self {
            persistence_path: Some(path.clone()),
            ..Self::new()
        };

        if let Some(buckets) = snapshot::load::<Vec<Bucket<S>>>(&path)? {
            for bucket in buckets {
                table.buckets.insert(bucket.key.clone(), bucket);
            }
            info!(
                kind = %S::KIND,
                path = %path.display(),
                buckets = table.buckets.len(),
                "Loaded bucket table from disk"
            );
        }

        Ok(table)
    }

    pub fn persistence_path(&self) -> Option<&Path> {
        self.persistence_path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Clone every bucket of `dimension` whose scope passes `keep`
    fn collect<F>(&self, dimension: Dimension, keep: F) -> Vec<Bucket<S>>
    where
        F: Fn(&BucketKey) -> bool,
    {
        self.buckets
            .iter()
            .filter(|entry| entry.key().dimension == dimension && keep(entry.key()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl<S: BucketSample> BucketTable<S> for MemoryBucketTable<S> {
    async fn insert(&self, sample: S, opts: &JobCommonOpts) -> Result<(), StoreError> {
        let key = BucketKey {
            scope: opts.scope.clone(),
            dimension: opts.dimension,
            bucket_time: opts.bucket_time(),
        };
        let now = Utc::now();

        match self.buckets.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().absorb(sample, now);
                debug!(
                    kind = %S::KIND,
                    bucket = %entry.key().bucket_time,
                    samples = entry.get().metrics.len(),
                    "Merged sample into bucket"
                );
            }
            Entry::Vacant(entry) => {
                let bucket = Bucket::create(entry.key().clone(), sample, now);
                debug!(kind = %S::KIND, bucket = %bucket.key.bucket_time, "Created bucket");
                entry.insert(bucket);
            }
        }

        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn get_raw(&self, opts: &JobCommonOpts, bucket: &str) -> Result<Vec<Bucket<S>>, StoreError> {
        let mut found = self.collect(opts.dimension, |key| {
            key.scope == opts.scope && (bucket.is_empty() || key.bucket_time == bucket)
        });
        found.sort_by(|a, b| a.key.bucket_time.cmp(&b.key.bucket_time));
        Ok(found)
    }

    async fn query_info(
        &self,
        scope: &ScopeKey,
        dimension: Dimension,
        since: DateTime<Utc>,
    ) -> Result<InfoView<S>, StoreError> {
        let buckets = self.collect(dimension, |key| key.scope == *scope);
        Ok(InfoView::from_buckets(scope.clone(), dimension, &buckets, since))
    }

    async fn list_info(
        &self,
        filter: &ScopeKey,
        dimension: Dimension,
        since: DateTime<Utc>,
        page: Page,
    ) -> Result<PagedInfo<S>, StoreError> {
        let buckets = self.collect(dimension, |key| key.scope.matches(filter));
        Ok(PagedInfo::from_buckets(dimension, &buckets, since, page))
    }

    async fn count_since(
        &self,
        filter: &ScopeKey,
        dimension: Dimension,
        after: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        // Bucket records, not samples
        let count = self
            .buckets
            .iter()
            .filter(|entry| {
                entry.key().dimension == dimension
                    && entry.key().scope.matches(filter)
                    && entry.value().has_sample_since(after)
            })
            .count();
        Ok(count as u64)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut buckets: Vec<Bucket<S>> = self.buckets.iter().map(|e| e.value().clone()).collect();
        buckets.sort_by(|a, b| a.key.cmp(&b.key));

        if let Err(e) = snapshot::save(path, &buckets) {
            // Keep the table dirty so the next flush retries
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(kind = %S::KIND, buckets = buckets.len(), "Bucket table flushed");
        Ok(())
    }
}
