//! HTTP API: health checks, Prometheus metrics and the read endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use rollup_lib::{
    error::StoreError,
    health::{ComponentStatus, HealthRegistry},
    models::{
        ClusterEngine, ClusterMetrics, Dimension, NamespaceMetrics, ObjectKind,
        PodAutoscalerMetrics, ProjectMetrics, ScopeKey, WorkloadMetrics,
    },
    store::{KindTable, Page, Stores},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub stores: Stores,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, stores: Stores) -> Self {
        Self {
            health_registry,
            stores,
        }
    }
}

/// Scope fields, dimension, window and paging of a read request
#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub cluster_id: String,
    pub cluster_type: Option<String>,
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
    pub dimension: Option<String>,
    /// RFC 3339 start of the window
    pub since: Option<String>,
    pub page: Option<usize>,
    pub size: Option<usize>,
}

impl ReadQuery {
    fn dimension(&self) -> Result<Dimension, String> {
        self.dimension.as_deref().unwrap_or_default().parse()
    }

    fn since(&self, dimension: Dimension, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
        match &self.since {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("invalid since {}: {}", raw, e)),
            None => Ok(now - dimension.default_query_window()),
        }
    }

    fn scope(&self, object_kind: ObjectKind) -> Result<ScopeKey, String> {
        let cluster_type = match &self.cluster_type {
            Some(raw) => raw.parse::<ClusterEngine>()?,
            None => ClusterEngine::default(),
        };
        Ok(ScopeKey {
            project_id: self.project_id.clone(),
            cluster_id: self.cluster_id.clone(),
            cluster_type,
            namespace: self.namespace.clone(),
            workload_type: self.workload_type.clone(),
            workload_name: self.workload_name.clone(),
            pod_autoscaler_type: self.pod_autoscaler_type.clone(),
            pod_autoscaler_name: self.pod_autoscaler_name.clone(),
            ..ScopeKey::any(object_kind)
        })
    }

    fn page(&self) -> Page {
        let default = Page::default();
        Page::new(
            self.page.unwrap_or(default.page),
            self.size.unwrap_or(default.size),
        )
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn store_failure(e: StoreError) -> Response {
    warn!(error = %e, "Read request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Parsed kind, scope, dimension and window of a read request
struct ReadRequest {
    scope: ScopeKey,
    dimension: Dimension,
    since: DateTime<Utc>,
}

fn parse_request(kind: &str, query: &ReadQuery) -> Result<ReadRequest, Response> {
    let kind: ObjectKind = kind
        .parse()
        .map_err(|e: String| error_response(StatusCode::NOT_FOUND, e))?;
    let bad_request = |e: String| error_response(StatusCode::BAD_REQUEST, e);
    let dimension = query.dimension().map_err(bad_request)?;
    let since = query.since(dimension, Utc::now()).map_err(bad_request)?;
    let scope = query.scope(kind).map_err(bad_request)?;
    Ok(ReadRequest {
        scope,
        dimension,
        since,
    })
}

async fn info_of<S: KindTable>(stores: &Stores, request: &ReadRequest) -> Response {
    match S::table(stores)
        .query_info(&request.scope, request.dimension, request.since)
        .await
    {
        Ok(view) => Json(view).into_response(),
        Err(e) => store_failure(e),
    }
}

async fn list_of<S: KindTable>(stores: &Stores, request: &ReadRequest, page: Page) -> Response {
    match S::table(stores)
        .list_info(&request.scope, request.dimension, request.since, page)
        .await
    {
        Ok(paged) => Json(paged).into_response(),
        Err(e) => store_failure(e),
    }
}

/// Samples of one scope in the trailing window
async fn info(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let request = match parse_request(&kind, &query) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let stores = &state.stores;
    match request.scope.object_kind {
        ObjectKind::Project => info_of::<ProjectMetrics>(stores, &request).await,
        ObjectKind::Cluster => info_of::<ClusterMetrics>(stores, &request).await,
        ObjectKind::Namespace => info_of::<NamespaceMetrics>(stores, &request).await,
        ObjectKind::Workload => info_of::<WorkloadMetrics>(stores, &request).await,
        ObjectKind::PodAutoscaler => info_of::<PodAutoscalerMetrics>(stores, &request).await,
    }
}

/// Paged per-scope views of every scope matching the filter
async fn list(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let request = match parse_request(&kind, &query) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let page = query.page();
    let stores = &state.stores;
    match request.scope.object_kind {
        ObjectKind::Project => list_of::<ProjectMetrics>(stores, &request, page).await,
        ObjectKind::Cluster => list_of::<ClusterMetrics>(stores, &request, page).await,
        ObjectKind::Namespace => list_of::<NamespaceMetrics>(stores, &request, page).await,
        ObjectKind::Workload => list_of::<WorkloadMetrics>(stores, &request, page).await,
        ObjectKind::PodAutoscaler => list_of::<PodAutoscalerMetrics>(stores, &request, page).await,
    }
}

/// Request snapshots and suggestions of workloads matching the filter
async fn public_data(State(state): State<Arc<AppState>>, Query(query): Query<ReadQuery>) -> Response {
    let filter = match query.scope(ObjectKind::Workload) {
        Ok(filter) => filter,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match state.stores.public.list(&filter).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => store_failure(e),
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 after the first job pass
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/public", get(public_data))
        .route("/api/v1/:kind/info", get(info))
        .route("/api/v1/:kind/list", get(list))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_read_query_defaults() {
        let query = ReadQuery::default();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(query.dimension().unwrap(), Dimension::Minute);
        assert_eq!(
            query.since(Dimension::Hour, now).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
        assert_eq!(query.page(), Page::default());
    }

    #[test]
    fn test_read_query_builds_scope() {
        let query = ReadQuery {
            project_id: "p1".into(),
            cluster_id: "c1".into(),
            cluster_type: Some("mesos".into()),
            namespace: "default".into(),
            ..Default::default()
        };
        let scope = query.scope(ObjectKind::Namespace).unwrap();
        assert_eq!(scope, ScopeKey::cluster("p1", "c1", ClusterEngine::Mesos).namespace("default"));

        let bad = ReadQuery {
            cluster_type: Some("nomad".into()),
            ..Default::default()
        };
        assert!(bad.scope(ObjectKind::Cluster).is_err());
    }

    #[test]
    fn test_invalid_since_is_rejected() {
        let query = ReadQuery {
            since: Some("yesterday".into()),
            ..Default::default()
        };
        assert!(query.since(Dimension::Minute, Utc::now()).is_err());
    }
}
