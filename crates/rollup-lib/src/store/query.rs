//! Window reads over bucket tables

use super::{Bucket, BucketSample};
use crate::models::{Dimension, ScopeKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Samples of one scope inside a trailing window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoView<S> {
    pub scope: ScopeKey,
    pub dimension: Dimension,
    /// Time of the first sample in the window
    pub start_time: Option<DateTime<Utc>>,
    /// Time of the last sample in the window
    pub end_time: Option<DateTime<Utc>>,
    pub metrics: Vec<S>,
}

impl<S: BucketSample> InfoView<S> {
    /// Unwind the buckets' samples, keep those at or after `since` and sort by time
    pub fn from_buckets<'a, I>(scope: ScopeKey, dimension: Dimension, buckets: I, since: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a Bucket<S>>,
    {
        let mut metrics: Vec<S> = buckets
            .into_iter()
            .flat_map(|bucket| bucket.samples_since(since).cloned())
            .collect();
        metrics.sort_by_key(|m| m.time());

        Self {
            scope,
            dimension,
            start_time: metrics.first().map(|m| m.time()),
            end_time: metrics.last().map(|m| m.time()),
            metrics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: usize,
    pub size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    /// Normalize user input: page 0 becomes 1, size 0 becomes the default
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page: page.max(1),
            size: if size == 0 { DEFAULT_PAGE_SIZE } else { size },
        }
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.size)
    }
}

/// One page of per-scope views
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedInfo<S> {
    /// Number of scopes with data in the window
    pub total: usize,
    pub page: usize,
    pub size: usize,
    pub items: Vec<InfoView<S>>,
}

impl<S: BucketSample> PagedInfo<S> {
    /// Group buckets per scope, drop scopes without samples in the window
    /// and cut out the requested page
    pub fn from_buckets<'a, I>(dimension: Dimension, buckets: I, since: DateTime<Utc>, page: Page) -> Self
    where
        I: IntoIterator<Item = &'a Bucket<S>>,
    {
        let mut grouped: BTreeMap<&ScopeKey, Vec<&Bucket<S>>> = BTreeMap::new();
        for bucket in buckets {
            grouped.entry(&bucket.key.scope).or_default().push(bucket);
        }

        let views: Vec<InfoView<S>> = grouped
            .into_iter()
            .map(|(scope, buckets)| InfoView::from_buckets(scope.clone(), dimension, buckets, since))
            .filter(|view| !view.is_empty())
            .collect();

        Self {
            total: views.len(),
            page: page.page,
            size: page.size,
            items: views.into_iter().skip(page.offset()).take(page.size).collect(),
        }
    }
}
