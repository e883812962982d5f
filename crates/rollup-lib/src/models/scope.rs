//! Scope keys and per-run job options

use super::{ClusterEngine, Dimension, ObjectKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a monitored object.
///
/// Only the fields relevant to `object_kind` are populated; the rest stay
/// empty and are ignored by selectors and filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    pub object_kind: ObjectKind,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_type: ClusterEngine,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub workload_type: String,
    #[serde(default)]
    pub workload_name: String,
    #[serde(default)]
    pub pod_autoscaler_type: String,
    #[serde(default)]
    pub pod_autoscaler_name: String,
}

impl ScopeKey {
    /// Empty scope of the given kind, used as a match-everything filter
    pub fn any(object_kind: ObjectKind) -> Self {
        Self {
            object_kind,
            project_id: String::new(),
            cluster_id: String::new(),
            cluster_type: ClusterEngine::default(),
            namespace: String::new(),
            workload_type: String::new(),
            workload_name: String::new(),
            pod_autoscaler_type: String::new(),
            pod_autoscaler_name: String::new(),
        }
    }

    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::any(ObjectKind::Project)
        }
    }

    pub fn cluster(
        project_id: impl Into<String>,
        cluster_id: impl Into<String>,
        engine: ClusterEngine,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            cluster_id: cluster_id.into(),
            cluster_type: engine,
            ..Self::any(ObjectKind::Cluster)
        }
    }

    /// Namespace scope inside this scope's cluster
    pub fn namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            object_kind: ObjectKind::Namespace,
            project_id: self.project_id.clone(),
            cluster_id: self.cluster_id.clone(),
            cluster_type: self.cluster_type,
            namespace: namespace.into(),
            ..Self::any(ObjectKind::Namespace)
        }
    }

    /// Workload scope inside this scope's namespace
    pub fn workload(&self, workload_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            object_kind: ObjectKind::Workload,
            workload_type: workload_type.into(),
            workload_name: name.into(),
            ..self.namespace(self.namespace.clone())
        }
    }

    /// Pod autoscaler scope inside this scope's namespace
    pub fn pod_autoscaler(
        &self,
        autoscaler_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            object_kind: ObjectKind::PodAutoscaler,
            pod_autoscaler_type: autoscaler_type.into(),
            pod_autoscaler_name: name.into(),
            ..self.namespace(self.namespace.clone())
        }
    }

    /// Same identifiers, different kind. Used to count workloads under a
    /// project, cluster or namespace scope.
    pub fn as_kind(&self, object_kind: ObjectKind) -> Self {
        Self {
            object_kind,
            ..self.clone()
        }
    }

    /// Labelled identifier fields in selector order
    fn fields(&self) -> [(&'static str, &str); 7] {
        [
            ("project_id", self.project_id.as_str()),
            ("cluster_id", self.cluster_id.as_str()),
            ("namespace", self.namespace.as_str()),
            ("workload_type", self.workload_type.as_str()),
            ("workload_name", self.workload_name.as_str()),
            ("pod_autoscaler_type", self.pod_autoscaler_type.as_str()),
            ("pod_autoscaler_name", self.pod_autoscaler_name.as_str()),
        ]
    }

    /// Label matcher for the populated fields, e.g. `project_id="p1",cluster_id="c1"`
    pub fn label_selector(&self) -> String {
        self.fields()
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{}=\"{}\"", key, escape_label(value)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// True when every populated field of `filter` equals the same field here
    pub fn matches(&self, filter: &ScopeKey) -> bool {
        self.fields()
            .iter()
            .zip(filter.fields().iter())
            .all(|((_, mine), (_, wanted))| wanted.is_empty() || mine == wanted)
    }

    /// Most specific populated name, used to label extremum records
    pub fn display_name(&self) -> &str {
        let name = match self.object_kind {
            ObjectKind::Project => &self.project_id,
            ObjectKind::Cluster => &self.cluster_id,
            ObjectKind::Namespace => &self.namespace,
            ObjectKind::Workload => &self.workload_name,
            ObjectKind::PodAutoscaler => &self.pod_autoscaler_name,
        };
        name.as_str()
    }
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Options for a single policy run. Built fresh by the caller for each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCommonOpts {
    pub scope: ScopeKey,
    pub dimension: Dimension,
    pub current_time: DateTime<Utc>,
}

impl JobCommonOpts {
    pub fn new(scope: ScopeKey, dimension: Dimension, current_time: DateTime<Utc>) -> Self {
        Self {
            scope,
            dimension,
            current_time,
        }
    }

    pub fn object_kind(&self) -> ObjectKind {
        self.scope.object_kind
    }

    /// Copy of these options pointing at a different instant
    pub fn at(&self, current_time: DateTime<Utc>) -> Self {
        Self {
            current_time,
            ..self.clone()
        }
    }

    /// Copy of these options for a different dimension
    pub fn with_dimension(&self, dimension: Dimension) -> Self {
        Self {
            dimension,
            ..self.clone()
        }
    }

    /// Bucket this run's sample belongs to
    pub fn bucket_time(&self) -> String {
        self.dimension.bucket_time(self.current_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace_scope() -> ScopeKey {
        ScopeKey::cluster("proj", "cls-1", ClusterEngine::K8s).namespace("default")
    }

    #[test]
    fn test_label_selector_skips_empty_fields() {
        let scope = namespace_scope();
        assert_eq!(
            scope.label_selector(),
            r#"project_id="proj",cluster_id="cls-1",namespace="default""#
        );
        assert_eq!(ScopeKey::any(ObjectKind::Cluster).label_selector(), "");
    }

    #[test]
    fn test_label_selector_escapes_quotes() {
        let scope = ScopeKey::project(r#"we"ird"#);
        assert_eq!(scope.label_selector(), r#"project_id="we\"ird""#);
    }

    #[test]
    fn test_workload_scope_inherits_parents() {
        let workload = namespace_scope().workload("Deployment", "api");
        assert_eq!(workload.object_kind, ObjectKind::Workload);
        assert_eq!(workload.project_id, "proj");
        assert_eq!(workload.cluster_id, "cls-1");
        assert_eq!(workload.namespace, "default");
        assert_eq!(workload.workload_name, "api");
        assert!(workload.pod_autoscaler_name.is_empty());
    }

    #[test]
    fn test_matches_uses_populated_filter_fields() {
        let workload = namespace_scope().workload("Deployment", "api");
        let cluster_filter = ScopeKey::cluster("proj", "cls-1", ClusterEngine::K8s);
        let other_cluster = ScopeKey::cluster("proj", "cls-2", ClusterEngine::K8s);

        assert!(workload.matches(&cluster_filter));
        assert!(workload.matches(&ScopeKey::any(ObjectKind::Workload)));
        assert!(!workload.matches(&other_cluster));
        assert!(!cluster_filter.matches(&workload));
    }

    #[test]
    fn test_opts_at_keeps_scope() {
        let now = Utc::now();
        let opts = JobCommonOpts::new(namespace_scope(), Dimension::Hour, now);
        let earlier = opts.at(now - chrono::Duration::hours(1));
        assert_eq!(earlier.scope, opts.scope);
        assert_eq!(earlier.dimension, Dimension::Hour);
        assert_ne!(earlier.current_time, opts.current_time);
    }
}
