//! Core data models for the rollup engine
//!
//! Scope keys identify the monitored object, dimensions describe the rollup
//! granularity, and the per-kind sample structs are what the bucket store
//! persists.

mod records;
mod scope;

pub use records::*;
pub use scope::*;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rollup granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    #[default]
    Minute,
    Hour,
    Day,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Minute, Dimension::Hour, Dimension::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Minute => "minute",
            Dimension::Hour => "hour",
            Dimension::Day => "day",
        }
    }

    /// Length of one period of this dimension
    pub fn step(&self) -> Duration {
        match self {
            Dimension::Minute => Duration::minutes(1),
            Dimension::Hour => Duration::hours(1),
            Dimension::Day => Duration::days(1),
        }
    }

    /// The next finer dimension, which this one rolls up
    pub fn finer(&self) -> Option<Dimension> {
        match self {
            Dimension::Minute => None,
            Dimension::Hour => Some(Dimension::Minute),
            Dimension::Day => Some(Dimension::Hour),
        }
    }

    /// Truncate `t` to the start of its period
    pub fn period_start(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let (y, m, d) = (t.year(), t.month(), t.day());
        let truncated = match self {
            Dimension::Minute => Utc.with_ymd_and_hms(y, m, d, t.hour(), t.minute(), 0),
            Dimension::Hour => Utc.with_ymd_and_hms(y, m, d, t.hour(), 0, 0),
            Dimension::Day => Utc.with_ymd_and_hms(y, m, d, 0, 0, 0),
        };
        // UTC has no gaps or folds, so truncation always resolves to a single instant
        truncated.single().unwrap_or(t)
    }

    /// The period a run at `t` summarizes: the one before the period containing `t`
    pub fn previous_period(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.period_start(t - self.step())
    }

    /// Bucket string for a sample taken at `t`.
    ///
    /// A bucket holds many periods of its dimension: minute samples are
    /// grouped per clock hour, hour samples per day and day samples per month.
    pub fn bucket_time(&self, t: DateTime<Utc>) -> String {
        match self {
            Dimension::Minute => t.format("%Y-%m-%dT%H").to_string(),
            Dimension::Hour => t.format("%Y-%m-%d").to_string(),
            Dimension::Day => t.format("%Y-%m").to_string(),
        }
    }

    /// Label used in extremum records to name the period an observation belongs to
    pub fn period_label(&self, t: DateTime<Utc>) -> String {
        match self {
            Dimension::Minute => t.format("%Y-%m-%d %H:%M").to_string(),
            Dimension::Hour => t.format("%Y-%m-%d %H:00").to_string(),
            Dimension::Day => t.format("%Y-%m-%d").to_string(),
        }
    }

    /// Trailing window served by the read API
    pub fn default_query_window(&self) -> Duration {
        match self {
            Dimension::Minute => Duration::hours(1),
            Dimension::Hour => Duration::hours(24),
            Dimension::Day => Duration::days(30),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "minute" => Ok(Dimension::Minute),
            "hour" => Ok(Dimension::Hour),
            "day" => Ok(Dimension::Day),
            other => Err(format!("unknown dimension: {}", other)),
        }
    }
}

/// Kind of monitored object; each kind has its own bucket table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Project,
    Cluster,
    Namespace,
    Workload,
    PodAutoscaler,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Project,
        ObjectKind::Cluster,
        ObjectKind::Namespace,
        ObjectKind::Workload,
        ObjectKind::PodAutoscaler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Project => "project",
            ObjectKind::Cluster => "cluster",
            ObjectKind::Namespace => "namespace",
            ObjectKind::Workload => "workload",
            ObjectKind::PodAutoscaler => "pod_autoscaler",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(ObjectKind::Project),
            "cluster" => Ok(ObjectKind::Cluster),
            "namespace" => Ok(ObjectKind::Namespace),
            "workload" => Ok(ObjectKind::Workload),
            "pod_autoscaler" | "podautoscaler" => Ok(ObjectKind::PodAutoscaler),
            other => Err(format!("unknown object kind: {}", other)),
        }
    }
}

/// Cluster engine, selects the metric getter strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterEngine {
    #[default]
    K8s,
    Mesos,
}

impl ClusterEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterEngine::K8s => "k8s",
            ClusterEngine::Mesos => "mesos",
        }
    }
}

impl FromStr for ClusterEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "k8s" | "kubernetes" => Ok(ClusterEngine::K8s),
            "mesos" => Ok(ClusterEngine::Mesos),
            other => Err(format!("unknown cluster engine: {}", other)),
        }
    }
}
