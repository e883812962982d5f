//! Time-series metric source adapter
//!
//! This module provides:
//! - The `MetricSource` trait for point and range queries
//! - A Prometheus-compatible HTTP implementation
//! - A retrying wrapper adding per-call deadlines and backoff

mod prometheus;
mod retry;

pub use self::prometheus::PrometheusSource;
pub use retry::{RetryConfig, RetryingSource};

use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single `(timestamp, value)` observation. The value keeps the backend's
/// string form so parsing failures can fall back to zero at the call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub timestamp: f64,
    pub value: String,
}

impl SamplePoint {
    pub fn new(timestamp: f64, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }

    /// Numeric value; unparsable or non-finite values read as zero
    pub fn as_f64(&self) -> f64 {
        match self.value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => 0.0,
        }
    }
}

/// Result of a point query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalarResult {
    pub points: Vec<SamplePoint>,
}

impl ScalarResult {
    pub fn new(points: Vec<SamplePoint>) -> Self {
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First point parsed as a number; missing or unparsable reads as zero
    pub fn first_value(&self) -> f64 {
        self.points.first().map(SamplePoint::as_f64).unwrap_or(0.0)
    }
}

/// Result of a range query, ordered by timestamp
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorResult {
    pub points: Vec<SamplePoint>,
}

impl VectorResult {
    pub fn new(points: Vec<SamplePoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points as `(timestamp, value)` pairs
    pub fn values(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.timestamp, p.as_f64()))
            .collect()
    }
}

/// Executes queries against a time-series backend
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Evaluate `query` at instant `at`
    async fn query(&self, query: &str, at: DateTime<Utc>) -> Result<ScalarResult, SourceError>;

    /// Evaluate `query` over `[from, to]` at a fixed `step`
    async fn query_range(
        &self,
        query: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
    ) -> Result<VectorResult, SourceError>;
}
