//! Error types shared across the rollup engine

use crate::models::{Dimension, ObjectKind};
use thiserror::Error;

/// Errors returned by a metric source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("metric source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metric source returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("metric source reported an error: {0}")]
    Query(String),

    #[error("metric source call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid metric source url: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors returned by the bucket store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by the discovery client
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("discovery returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid discovery url: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors that abort a policy run
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A roll-up found zero or several finer buckets where exactly one was expected
    #[error("{kind} {dimension} roll-up expected exactly one {finer} bucket {bucket}, found {found}")]
    RollupSourceNotSingular {
        kind: ObjectKind,
        dimension: Dimension,
        finer: Dimension,
        bucket: String,
        found: usize,
    },

    #[error("{kind} has no {dimension} policy that rolls up a finer dimension")]
    NotARollup {
        kind: ObjectKind,
        dimension: Dimension,
    },

    #[error("scope kind {actual} does not match policy kind {expected}")]
    KindMismatch {
        expected: ObjectKind,
        actual: ObjectKind,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),
}
