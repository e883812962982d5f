//! Component health of the rollup engine
//!
//! Components report the outcome of each operation. A failure degrades the
//! component; repeated failures in a row mark it unhealthy until the next
//! success.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a component is unhealthy
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Worst status wins
fn overall(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
    components
        .values()
        .map(|c| c.status)
        .max_by_key(|status| match status {
            ComponentStatus::Healthy => 0,
            ComponentStatus::Degraded => 1,
            ComponentStatus::Unhealthy => 2,
        })
        .unwrap_or(ComponentStatus::Healthy)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const METRIC_SOURCE: &str = "metric_source";
    pub const STORE: &str = "store";
    pub const JOB_DRIVER: &str = "job_driver";
    pub const DISCOVERY: &str = "discovery";

    pub const ALL: [&str; 4] = [METRIC_SOURCE, STORE, JOB_DRIVER, DISCOVERY];
}

#[derive(Debug, Default)]
struct HealthState {
    components: HashMap<String, ComponentHealth>,
    ready: bool,
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
    unhealthy_after: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_UNHEALTHY_AFTER)
    }

    pub fn with_threshold(unhealthy_after: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(HealthState::default())),
            unhealthy_after: unhealthy_after.max(1),
        }
    }

    /// Register every engine component as healthy
    pub async fn register_all(&self) {
        for name in components::ALL {
            self.register(name).await;
        }
    }

    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn report_success(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn report_failure(&self, name: &str, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(name)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
            + 1;
        let status = if failures >= self.unhealthy_after {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        state.components.insert(
            name.to_string(),
            ComponentHealth {
                status,
                message: Some(message.into()),
                consecutive_failures: failures,
                last_check_timestamp: Utc::now().timestamp(),
            },
        );
    }

    /// Report the outcome of an operation on `name`
    pub async fn observe<T, E: Display>(&self, name: &str, result: &Result<T, E>) {
        match result {
            Ok(_) => self.report_success(name).await,
            Err(e) => self.report_failure(name, e.to_string()).await,
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse {
            status: overall(&components),
            components,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.ready {
            Some("First job pass has not completed".to_string())
        } else if overall(&state.components) == ComponentStatus::Unhealthy {
            Some("Component unhealthy".to_string())
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registered_components_start_healthy() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), 4);
    }

    #[tokio::test]
    async fn test_failures_degrade_then_turn_unhealthy() {
        let registry = HealthRegistry::with_threshold(2);
        registry.register_all().await;

        registry.report_failure(components::METRIC_SOURCE, "timeout").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.report_failure(components::METRIC_SOURCE, "timeout").await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(health.components[components::METRIC_SOURCE].consecutive_failures, 2);

        registry
            .observe::<(), String>(components::METRIC_SOURCE, &Ok(()))
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_readiness_follows_first_pass_and_health() {
        let registry = HealthRegistry::with_threshold(1);
        registry.register_all().await;
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .observe::<(), &str>(components::STORE, &Err("disk full"))
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Component unhealthy"));
    }
}
