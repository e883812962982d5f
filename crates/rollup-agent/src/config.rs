//! Agent configuration

use anyhow::{Context, Result};
use rollup_lib::job::JobConfig;
use rollup_lib::metric::CounterDeltaConfig;
use rollup_lib::policy::DEFAULT_SUGGESTION_HEADROOM;
use rollup_lib::source::RetryConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "ROLLUP_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance name attached to structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health, metrics and the read API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Prometheus-compatible metric source
    #[serde(default = "default_metric_source_url")]
    pub metric_source_url: String,

    /// Topology discovery service
    #[serde(default = "default_discovery_url")]
    pub discovery_url: String,

    /// Directory for bucket snapshots; in-memory only when unset
    #[serde(default)]
    pub persistence_dir: Option<PathBuf>,

    /// Deadline of a single metric source or discovery call
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Minute schedule tick
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Concurrent policy runs per pass
    #[serde(default = "default_concurrency")]
    pub job_concurrency: usize,

    #[serde(default = "default_concurrency")]
    pub discovery_concurrency: usize,

    /// Re-discover the topology every N ticks
    #[serde(default = "default_discovery_every")]
    pub discovery_every_ticks: u64,

    /// Counter-delta lookback
    #[serde(default = "default_counter_window")]
    pub counter_window_secs: u64,

    /// Counter-delta range query resolution
    #[serde(default = "default_counter_step")]
    pub counter_step_secs: u64,

    /// Fraction added on top of observed peaks for request suggestions
    #[serde(default = "default_suggestion_headroom")]
    pub suggestion_headroom: f64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "rollup".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_metric_source_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_discovery_url() -> String {
    "http://cluster-registry:8080".to_string()
}

fn default_query_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_tick_interval() -> u64 {
    60
}

fn default_concurrency() -> usize {
    32
}

fn default_discovery_every() -> u64 {
    5
}

fn default_counter_window() -> u64 {
    30 * 60
}

fn default_counter_step() -> u64 {
    30
}

fn default_suggestion_headroom() -> f64 {
    DEFAULT_SUGGESTION_HEADROOM
}

impl AgentConfig {
    /// Load from the file named by `ROLLUP_CONFIG` (if any) and `ROLLUP_*`
    /// environment variables
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(file)
    }

    /// Environment variables override values from `file`
    pub fn load_from(file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("ROLLUP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.counter_step_secs == 0 {
            anyhow::bail!("counter_step_secs must be positive");
        }
        if self.counter_window_secs < self.counter_step_secs {
            anyhow::bail!("counter_window_secs must be at least counter_step_secs");
        }
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            call_timeout: self.query_timeout(),
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn counter_config(&self) -> CounterDeltaConfig {
        CounterDeltaConfig {
            window: Duration::from_secs(self.counter_window_secs),
            step: Duration::from_secs(self.counter_step_secs),
        }
    }

    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            concurrency: self.job_concurrency,
            discovery_concurrency: self.discovery_concurrency,
            discovery_every: self.discovery_every_ticks,
        }
    }
}
