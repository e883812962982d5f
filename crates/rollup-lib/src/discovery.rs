//! Cluster and project discovery
//!
//! Lists the objects the rollup jobs run for and turns them into scope keys.
//! Namespace and workload listing fan out with a bounded worker pool.

use crate::error::DiscoveryError;
use crate::models::{ClusterEngine, ObjectKind, ScopeKey};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

/// Node status reported for schedulable nodes
pub const NODE_RUNNING: &str = "RUNNING";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub id: String,
    #[serde(default)]
    pub engine: ClusterEngine,
}

/// A workload or pod autoscaler inside a namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedObject {
    #[serde(rename = "type")]
    pub object_type: String,
    pub name: String,
}

#[async_trait]
pub trait ClusterDiscovery: Send + Sync {
    async fn list_nodes_in_cluster(&self, cluster_id: &str) -> Result<Vec<NodeInfo>, DiscoveryError>;

    async fn list_projects(&self) -> Result<Vec<String>, DiscoveryError>;

    async fn list_clusters(&self, project_id: &str) -> Result<Vec<ClusterInfo>, DiscoveryError>;

    async fn list_namespaces(&self, cluster_id: &str) -> Result<Vec<String>, DiscoveryError>;

    async fn list_workloads(&self, cluster_id: &str, namespace: &str) -> Result<Vec<NamedObject>, DiscoveryError>;

    async fn list_pod_autoscalers(
        &self,
        cluster_id: &str,
        namespace: &str,
    ) -> Result<Vec<NamedObject>, DiscoveryError>;
}

/// Nodes whose status is RUNNING
pub fn available_nodes(nodes: &[NodeInfo]) -> u64 {
    nodes.iter().filter(|n| n.status == NODE_RUNNING).count() as u64
}

/// Discovery over a JSON HTTP API
pub struct HttpDiscovery {
    client: Client,
    base_url: Url,
}

impl HttpDiscovery {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(base_url)?;
        Ok(Self { client, base_url })
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, DiscoveryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);

        debug!(url = %url, "Discovery request");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Status { status, body });
        }

        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct ProjectEntry {
    id: String,
}

#[derive(Deserialize)]
struct NamespaceEntry {
    name: String,
}

#[async_trait]
impl ClusterDiscovery for HttpDiscovery {
    async fn list_nodes_in_cluster(&self, cluster_id: &str) -> Result<Vec<NodeInfo>, DiscoveryError> {
        self.get(&["api", "v1", "clusters", cluster_id, "nodes"]).await
    }

    async fn list_projects(&self) -> Result<Vec<String>, DiscoveryError> {
        let projects: Vec<ProjectEntry> = self.get(&["api", "v1", "projects"]).await?;
        Ok(projects.into_iter().map(|p| p.id).collect())
    }

    async fn list_clusters(&self, project_id: &str) -> Result<Vec<ClusterInfo>, DiscoveryError> {
        self.get(&["api", "v1", "projects", project_id, "clusters"]).await
    }

    async fn list_namespaces(&self, cluster_id: &str) -> Result<Vec<String>, DiscoveryError> {
        let namespaces: Vec<NamespaceEntry> =
            self.get(&["api", "v1", "clusters", cluster_id, "namespaces"]).await?;
        Ok(namespaces.into_iter().map(|n| n.name).collect())
    }

    async fn list_workloads(&self, cluster_id: &str, namespace: &str) -> Result<Vec<NamedObject>, DiscoveryError> {
        self.get(&["api", "v1", "clusters", cluster_id, "namespaces", namespace, "workloads"])
            .await
    }

    async fn list_pod_autoscalers(
        &self,
        cluster_id: &str,
        namespace: &str,
    ) -> Result<Vec<NamedObject>, DiscoveryError> {
        self.get(&["api", "v1", "clusters", cluster_id, "namespaces", namespace, "podautoscalers"])
            .await
    }
}

/// Build the scope key of every project, cluster, namespace, workload and
/// pod autoscaler. Listing errors are logged and the branch is skipped.
pub async fn collect_scopes(discovery: Arc<dyn ClusterDiscovery>, concurrency: usize) -> Vec<ScopeKey> {
    let mut scopes = Vec::new();
    let mut clusters = Vec::new();

    let projects = match discovery.list_projects().await {
        Ok(projects) => projects,
        Err(e) => {
            warn!(error = %e, "Failed to list projects");
            return scopes;
        }
    };

    for project_id in projects {
        scopes.push(ScopeKey::project(&project_id));
        match discovery.list_clusters(&project_id).await {
            Ok(found) => {
                for cluster in found {
                    let scope = ScopeKey::cluster(&project_id, cluster.id, cluster.engine);
                    scopes.push(scope.clone());
                    clusters.push(scope);
                }
            }
            Err(e) => warn!(project_id = %project_id, error = %e, "Failed to list clusters"),
        }
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    // Namespaces per cluster
    let namespaces = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();
    for cluster in clusters {
        let discovery = discovery.clone();
        let semaphore = semaphore.clone();
        let namespaces = namespaces.clone();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            match discovery.list_namespaces(&cluster.cluster_id).await {
                Ok(found) => {
                    let mut shared = namespaces.lock().await;
                    shared.extend(found.into_iter().map(|ns| cluster.namespace(ns)));
                }
                Err(e) => warn!(cluster_id = %cluster.cluster_id, error = %e, "Failed to list namespaces"),
            }
        });
    }
    drain(&mut tasks).await;

    let namespaces = std::mem::take(&mut *namespaces.lock().await);

    // Workloads and pod autoscalers per namespace
    let children = Arc::new(Mutex::new(Vec::new()));
    for namespace in &namespaces {
        let discovery = discovery.clone();
        let semaphore = semaphore.clone();
        let children = children.clone();
        let namespace = namespace.clone();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let cluster_id = namespace.cluster_id.as_str();
            let mut found = Vec::new();

            match discovery.list_workloads(cluster_id, &namespace.namespace).await {
                Ok(workloads) => found.extend(
                    workloads
                        .into_iter()
                        .map(|w| namespace.workload(w.object_type, w.name)),
                ),
                Err(e) => warn!(
                    cluster_id = %cluster_id,
                    namespace = %namespace.namespace,
                    error = %e,
                    "Failed to list workloads"
                ),
            }
            match discovery.list_pod_autoscalers(cluster_id, &namespace.namespace).await {
                Ok(autoscalers) => found.extend(
                    autoscalers
                        .into_iter()
                        .map(|a| namespace.pod_autoscaler(a.object_type, a.name)),
                ),
                Err(e) => warn!(
                    cluster_id = %cluster_id,
                    namespace = %namespace.namespace,
                    error = %e,
                    "Failed to list pod autoscalers"
                ),
            }

            children.lock().await.extend(found);
        });
    }
    drain(&mut tasks).await;

    scopes.extend(namespaces);
    scopes.append(&mut *children.lock().await);
    scopes.sort();

    info!(
        projects = count(&scopes, ObjectKind::Project),
        clusters = count(&scopes, ObjectKind::Cluster),
        namespaces = count(&scopes, ObjectKind::Namespace),
        workloads = count(&scopes, ObjectKind::Workload),
        pod_autoscalers = count(&scopes, ObjectKind::PodAutoscaler),
        "Scope discovery complete"
    );
    scopes
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Discovery worker failed");
        }
    }
}

fn count(scopes: &[ScopeKey], kind: ObjectKind) -> usize {
    scopes.iter().filter(|s| s.object_kind == kind).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_available_nodes_counts_running() {
        let nodes = vec![
            NodeInfo {
                name: "n1".into(),
                status: "RUNNING".into(),
            },
            NodeInfo {
                name: "n2".into(),
                status: "NOT_READY".into(),
            },
            NodeInfo {
                name: "n3".into(),
                status: "RUNNING".into(),
            },
        ];
        assert_eq!(available_nodes(&nodes), 2);
        assert_eq!(available_nodes(&[]), 0);
    }

    /// Fixed topology; cluster "broken" fails namespace listing
    struct StaticDiscovery {
        namespaces: HashMap<&'static str, Vec<&'static str>>,
    }

    #[async_trait]
    impl ClusterDiscovery for StaticDiscovery {
        async fn list_nodes_in_cluster(&self, _cluster_id: &str) -> Result<Vec<NodeInfo>, DiscoveryError> {
            Ok(Vec::new())
        }

        async fn list_projects(&self) -> Result<Vec<String>, DiscoveryError> {
            Ok(vec!["p1".to_string()])
        }

        async fn list_clusters(&self, _project_id: &str) -> Result<Vec<ClusterInfo>, DiscoveryError> {
            Ok(vec![
                ClusterInfo {
                    id: "c1".into(),
                    engine: ClusterEngine::K8s,
                },
                ClusterInfo {
                    id: "broken".into(),
                    engine: ClusterEngine::Mesos,
                },
            ])
        }

        async fn list_namespaces(&self, cluster_id: &str) -> Result<Vec<String>, DiscoveryError> {
            self.namespaces
                .get(cluster_id)
                .map(|ns| ns.iter().map(|s| s.to_string()).collect())
                .ok_or(DiscoveryError::Status {
                    status: 500,
                    body: "boom".into(),
                })
        }

        async fn list_workloads(&self, _cluster_id: &str, namespace: &str) -> Result<Vec<NamedObject>, DiscoveryError> {
            Ok(vec![NamedObject {
                object_type: "Deployment".into(),
                name: format!("{}-web", namespace),
            }])
        }

        async fn list_pod_autoscalers(
            &self,
            _cluster_id: &str,
            namespace: &str,
        ) -> Result<Vec<NamedObject>, DiscoveryError> {
            if namespace == "default" {
                Ok(vec![NamedObject {
                    object_type: "HorizontalPodAutoscaler".into(),
                    name: "web-hpa".into(),
                }])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[tokio::test]
    async fn test_collect_scopes_builds_every_kind() {
        let discovery = Arc::new(StaticDiscovery {
            namespaces: HashMap::from([("c1", vec!["default", "batch"])]),
        });

        let scopes = collect_scopes(discovery, 2).await;
        let of = |kind| scopes.iter().filter(|s| s.object_kind == kind).count();

        assert_eq!(of(ObjectKind::Project), 1);
        assert_eq!(of(ObjectKind::Cluster), 2);
        assert_eq!(of(ObjectKind::Namespace), 2);
        assert_eq!(of(ObjectKind::Workload), 2);
        assert_eq!(of(ObjectKind::PodAutoscaler), 1);

        let hpa = scopes
            .iter()
            .find(|s| s.object_kind == ObjectKind::PodAutoscaler)
            .unwrap();
        assert_eq!(hpa.namespace, "default");
        assert_eq!(hpa.cluster_id, "c1");
    }

    #[tokio::test]
    async fn test_http_discovery_lists_nodes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/clusters/c1/nodes")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"name":"n1","status":"RUNNING"},{"name":"n2","status":"DOWN"}]"#)
            .create_async()
            .await;

        let discovery = HttpDiscovery::new(&server.url(), Duration::from_secs(5)).unwrap();
        let nodes = discovery.list_nodes_in_cluster("c1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(available_nodes(&nodes), 1);
    }

    #[tokio::test]
    async fn test_http_discovery_reports_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/projects")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let discovery = HttpDiscovery::new(&server.url(), Duration::from_secs(5)).unwrap();
        match discovery.list_projects().await {
            Err(DiscoveryError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_discovery_decodes_clusters() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/projects/p1/clusters")
            .with_status(200)
            .with_body(r#"[{"id":"c1","engine":"mesos"},{"id":"c2"}]"#)
            .create_async()
            .await;

        let discovery = HttpDiscovery::new(&server.url(), Duration::from_secs(5)).unwrap();
        let clusters = discovery.list_clusters("p1").await.unwrap();
        assert_eq!(clusters[0].engine, ClusterEngine::Mesos);
        assert_eq!(clusters[1].engine, ClusterEngine::K8s);
    }
}
