//! Metric getters
//!
//! Translate "CPU/memory/instance/node metrics of object X at time T" into
//! metric source queries. Each cluster engine has its own template set and
//! getter; the scope key's engine picks the getter.

pub mod counter;
mod k8s;
mod mesos;
pub mod query;

pub use counter::{
    count_increases, estimate_counter_delta, fill_metrics, increasing_interval_difference,
    CounterDelta, CounterDeltaConfig, CounterObservation,
};
pub use k8s::{K8sMetricGetter, K8S_TEMPLATES};
pub use mesos::{MesosMetricGetter, MESOS_TEMPLATES};
pub use query::{EngineTemplates, QueryWindow, ResourceTemplates};

use crate::error::SourceError;
use crate::models::{ClusterEngine, ResourceUsage, ScopeKey};
use crate::source::MetricSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cluster autoscaler events in a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaEvents {
    pub scale_up: u64,
    pub scale_down: u64,
}

/// Engine-specific metric retrieval
#[async_trait]
pub trait MetricGetter: Send + Sync {
    fn engine(&self) -> ClusterEngine;

    async fn cluster_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError>;
    async fn cluster_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError>;
    async fn namespace_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError>;
    async fn namespace_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError>;
    async fn workload_cpu(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError>;
    async fn workload_memory(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<ResourceUsage, SourceError>;

    /// Running instances (pods or tasks) under the scope
    async fn instance_count(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<f64, SourceError>;

    /// Nodes under the scope
    async fn node_count(&self, scope: &ScopeKey, window: &QueryWindow) -> Result<f64, SourceError>;

    /// Successful pod autoscaler rescales in `[from, to]`
    async fn pod_autoscaler_count(
        &self,
        scope: &ScopeKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, SourceError>;

    /// Cluster autoscaler scale-up and scale-down events in `[from, to]`
    async fn ca_count(
        &self,
        scope: &ScopeKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<CaEvents, SourceError>;
}

/// One getter per cluster engine
#[derive(Clone)]
pub struct GetterSet {
    k8s: Arc<dyn MetricGetter>,
    mesos: Arc<dyn MetricGetter>,
}

impl GetterSet {
    pub fn new(k8s: Arc<dyn MetricGetter>, mesos: Arc<dyn MetricGetter>) -> Self {
        Self { k8s, mesos }
    }

    /// Build both getters on top of one metric source
    pub fn from_source(source: Arc<dyn MetricSource>, counter: CounterDeltaConfig) -> Self {
        Self {
            k8s: Arc::new(K8sMetricGetter::new(source.clone(), counter)),
            mesos: Arc::new(MesosMetricGetter::new(source)),
        }
    }

    pub fn for_engine(&self, engine: ClusterEngine) -> &dyn MetricGetter {
        match engine {
            ClusterEngine::K8s => self.k8s.as_ref(),
            ClusterEngine::Mesos => self.mesos.as_ref(),
        }
    }

    /// Getter for the engine a scope runs on
    pub fn for_scope(&self, scope: &ScopeKey) -> &dyn MetricGetter {
        self.for_engine(scope.cluster_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SamplePoint, ScalarResult, VectorResult};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every query and answers with a fixed value
    #[derive(Default)]
    struct RecordingSource {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MetricSource for RecordingSource {
        async fn query(&self, query: &str, _at: DateTime<Utc>) -> Result<ScalarResult, SourceError> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(ScalarResult::new(vec![SamplePoint::new(0.0, "2")]))
        }

        async fn query_range(
            &self,
            query: &str,
            from: DateTime<Utc>,
            _to: DateTime<Utc>,
            step: Duration,
        ) -> Result<VectorResult, SourceError> {
            self.queries.lock().unwrap().push(query.to_string());
            let base = from.timestamp() as f64;
            let step = step.as_secs_f64();
            Ok(VectorResult::new(vec![
                SamplePoint::new(base, "1"),
                SamplePoint::new(base + step, "3"),
                SamplePoint::new(base + 2.0 * step, "0"),
                SamplePoint::new(base + 3.0 * step, "1"),
            ]))
        }
    }

    fn scope() -> ScopeKey {
        ScopeKey::cluster("p1", "c1", ClusterEngine::K8s)
    }

    #[tokio::test]
    async fn test_usage_issues_three_queries() {
        let source = Arc::new(RecordingSource::default());
        let getter = K8sMetricGetter::new(source.clone(), CounterDeltaConfig::default());

        let usage = getter
            .cluster_cpu(&scope(), &QueryWindow::Instant(Utc::now()))
            .await
            .unwrap();

        assert_eq!(usage.request, 2.0);
        assert_eq!(usage.used, 2.0);
        assert_eq!(usage.total, 2.0);

        let queries = source.queries.lock().unwrap();
        assert_eq!(queries.len(), 3);
        assert!(queries
            .iter()
            .all(|q| q.contains(r#"project_id="p1",cluster_id="c1""#)));
    }

    #[tokio::test]
    async fn test_average_window_is_applied() {
        let source = Arc::new(RecordingSource::default());
        let getter = K8sMetricGetter::new(source.clone(), CounterDeltaConfig::default());

        let window = QueryWindow::Average {
            end: Utc::now(),
            range: Duration::from_secs(3600),
        };
        getter.instance_count(&scope(), &window).await.unwrap();

        let queries = source.queries.lock().unwrap();
        assert!(queries[0].starts_with("avg_over_time((count(kube_pod_status_phase"));
        assert!(queries[0].ends_with("[3600s:])"));
    }

    #[tokio::test]
    async fn test_ca_count_sums_increases() {
        let source = Arc::new(RecordingSource::default());
        let getter = K8sMetricGetter::new(source.clone(), CounterDeltaConfig::default());

        let from = chrono::TimeZone::timestamp_opt(&Utc, 1_000, 0).unwrap();
        let to = from + chrono::Duration::seconds(90);
        let events = getter.ca_count(&scope(), from, to).await.unwrap();

        // 1,3,0,1 -> +2 +1
        assert_eq!(events.scale_up, 3);
        assert_eq!(events.scale_down, 3);
    }

    #[tokio::test]
    async fn test_mesos_has_no_autoscaler_events() {
        let source = Arc::new(RecordingSource::default());
        let getter = MesosMetricGetter::new(source.clone());
        let now = Utc::now();

        assert_eq!(getter.pod_autoscaler_count(&scope(), now, now).await.unwrap(), 0);
        assert_eq!(getter.ca_count(&scope(), now, now).await.unwrap(), CaEvents::default());
        assert!(source.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn test_getter_set_dispatches_on_engine() {
        let source: Arc<dyn MetricSource> = Arc::new(RecordingSource::default());
        let getters = GetterSet::from_source(source, CounterDeltaConfig::default());

        let mesos_scope = ScopeKey::cluster("p1", "c2", ClusterEngine::Mesos);
        assert_eq!(getters.for_scope(&scope()).engine(), ClusterEngine::K8s);
        assert_eq!(getters.for_scope(&mesos_scope).engine(), ClusterEngine::Mesos);
    }
}
