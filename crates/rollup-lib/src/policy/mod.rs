//! Dimension policies
//!
//! A policy produces one sample for one scope and one dimension:
//! - minute policies sample the metric getters and seed point extrema
//! - hour and day policies carry the extrema of exactly one finer bucket
//!   forward and sample only their own period's averages
//!
//! Policies are stateless; the registry hands out one shared instance per
//! object kind and trigger.

mod dimension;
mod registry;
mod sampler;
mod workload;


pub use dimension::{MinutePolicy, RollupPolicy};
pub use registry::{PolicyRegistry, PolicyTrigger};
pub use sampler::{
    ClusterSampler, KindSampler, NamespaceSampler, PodAutoscalerSampler, ProjectSampler,
    WorkloadSampler,
};
pub use workload::{WorkloadRequestPolicy, WorkloadSuggestionPolicy};

use crate::discovery::ClusterDiscovery;
use crate::error::PolicyError;
use crate::metric::{GetterSet, QueryWindow};
use crate::models::{Dimension, JobCommonOpts, ObjectKind};
use crate::observability::RollupMetrics;
use crate::store::Stores;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default headroom applied to suggested requests
pub const DEFAULT_SUGGESTION_HEADROOM: f64 = 0.2;

/// Everything a policy run talks to
#[derive(Clone)]
pub struct PolicyClients {
    pub getters: GetterSet,
    pub discovery: Arc<dyn ClusterDiscovery>,
    pub stores: Stores,
    pub metrics: RollupMetrics,
    /// Fraction added on top of observed peaks when suggesting requests
    pub suggestion_headroom: f64,
}

impl PolicyClients {
    pub fn new(getters: GetterSet, discovery: Arc<dyn ClusterDiscovery>, stores: Stores) -> Self {
        Self {
            getters,
            discovery,
            stores,
            metrics: RollupMetrics::new(),
            suggestion_headroom: DEFAULT_SUGGESTION_HEADROOM,
        }
    }

    pub fn with_suggestion_headroom(mut self, headroom: f64) -> Self {
        self.suggestion_headroom = headroom.max(0.0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOutcome {
    Written,
    /// Nothing to write, e.g. no source data for a suggestion
    Skipped,
}

impl PolicyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyOutcome::Written => "written",
            PolicyOutcome::Skipped => "skipped",
        }
    }
}

#[async_trait]
pub trait Policy: Send + Sync {
    fn object_kind(&self) -> ObjectKind;

    /// Short label used in logs and metrics
    fn label(&self) -> &'static str;

    async fn implement_policy(
        &self,
        opts: &JobCommonOpts,
        clients: &PolicyClients,
    ) -> Result<PolicyOutcome, PolicyError>;
}

/// Period a policy run samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleWindow {
    pub dimension: Dimension,
    /// Time stamped on the sample: the start of the sampled period
    pub period: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SampleWindow {
    /// Minute runs sample the instant of the current minute and look one
    /// minute back for existence counts. Hour and day runs cover the whole
    /// previous period.
    pub fn for_run(opts: &JobCommonOpts) -> Self {
        let dimension = opts.dimension;
        match dimension {
            Dimension::Minute => {
                let period = dimension.period_start(opts.current_time);
                Self {
                    dimension,
                    period,
                    start: period - dimension.step(),
                    end: period,
                }
            }
            Dimension::Hour | Dimension::Day => {
                let period = dimension.previous_period(opts.current_time);
                Self {
                    dimension,
                    period,
                    start: period,
                    end: period + dimension.step(),
                }
            }
        }
    }

    pub fn query_window(&self) -> QueryWindow {
        match self.dimension {
            Dimension::Minute => QueryWindow::Instant(self.end),
            Dimension::Hour | Dimension::Day => QueryWindow::Average {
                end: self.end,
                range: (self.end - self.start).to_std().unwrap_or_default(),
            },
        }
    }

    pub fn period_label(&self) -> String {
        self.dimension.period_label(self.period)
    }
}
