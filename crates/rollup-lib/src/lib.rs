//! Fleet metric roll-up engine
//!
//! This crate provides the core functionality for:
//! - Querying a Prometheus-compatible metric source per cluster engine
//! - Discovering projects, clusters, namespaces, workloads and autoscalers
//! - Minute sampling with hour and day roll-ups into time buckets
//! - Workload request snapshots and daily request suggestions
//! - Health checks and observability

pub mod discovery;
pub mod error;
pub mod health;
pub mod job;
pub mod metric;
pub mod models;
pub mod observability;
pub mod policy;
pub mod source;
pub mod store;

pub use error::{DiscoveryError, PolicyError, SourceError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use job::{JobConfig, JobDriver, JobDriverBuilder, PassSummary};
pub use models::*;
pub use observability::{RollupMetrics, StructuredLogger};
