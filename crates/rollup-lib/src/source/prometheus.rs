//! Prometheus HTTP API client

use super::{MetricSource, SamplePoint, ScalarResult, VectorResult};
use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Metric source backed by the Prometheus `/api/v1/query*` endpoints.
/// Queries are sent as form-encoded POST bodies so long selectors are safe.
pub struct PrometheusSource {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum ApiData {
    Vector(Vec<VectorSeries>),
    Matrix(Vec<MatrixSeries>),
    Scalar((f64, String)),
    #[serde(rename = "string")]
    Text((f64, String)),
}

#[derive(Debug, Deserialize)]
struct VectorSeries {
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    values: Vec<(f64, String)>,
}

impl ApiData {
    /// Points of the first series. Rollup queries aggregate to a single
    /// series, so anything after the first is ignored.
    fn into_points(self) -> Vec<SamplePoint> {
        match self {
            ApiData::Vector(series) => series
                .into_iter()
                .take(1)
                .map(|s| SamplePoint::new(s.value.0, s.value.1))
                .collect(),
            ApiData::Matrix(series) => series
                .into_iter()
                .next()
                .map(|s| {
                    s.values
                        .into_iter()
                        .map(|(ts, v)| SamplePoint::new(ts, v))
                        .collect()
                })
                .unwrap_or_default(),
            ApiData::Scalar((ts, v)) | ApiData::Text((ts, v)) => vec![SamplePoint::new(ts, v)],
        }
    }
}

impl PrometheusSource {
    /// Create a client for the Prometheus server at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(base_url)?;
        Ok(Self { client, base_url })
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<Vec<SamplePoint>, SourceError> {
        let url = self.base_url.join(path)?;

        let response = self.client.post(url).form(form).send().await?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 422 && status.as_u16() != 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // 400/422 carry a structured error body
        let body: ApiResponse = response.json().await?;
        if body.status != "success" {
            return Err(SourceError::Query(
                body.error.unwrap_or_else(|| format!("status {}", body.status)),
            ));
        }

        Ok(body.data.map(ApiData::into_points).unwrap_or_default())
    }
}

fn unix_seconds(t: DateTime<Utc>) -> String {
    format!("{:.3}", t.timestamp_millis() as f64 / 1000.0)
}

#[async_trait]
impl MetricSource for PrometheusSource {
    async fn query(&self, query: &str, at: DateTime<Utc>) -> Result<ScalarResult, SourceError> {
        debug!(query = %query, "Running instant query");
        let form = [("query", query.to_string()), ("time", unix_seconds(at))];
        let points = self.post("api/v1/query", &form).await?;
        Ok(ScalarResult::new(points))
    }

    async fn query_range(
        &self,
        query: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
    ) -> Result<VectorResult, SourceError> {
        debug!(query = %query, step_secs = step.as_secs_f64(), "Running range query");
        let form = [
            ("query", query.to_string()),
            ("start", unix_seconds(from)),
            ("end", unix_seconds(to)),
            ("step", format!("{}", step.as_secs_f64())),
        ];
        let points = self.post("api/v1/query_range", &form).await?;
        Ok(VectorResult::new(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source(server: &mockito::ServerGuard) -> PrometheusSource {
        PrometheusSource::new(&format!("{}/", server.url()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_instant_query_vector() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{},"value":[1700000000.0,"4.5"]},
                    {"metric":{},"value":[1700000000.0,"9"]}]}}"#,
            )
            .create_async()
            .await;

        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let result = source(&server).query("up", at).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.points.len(), 1);
        assert_eq!(result.first_value(), 4.5);
    }

    #[tokio::test]
    async fn test_range_query_matrix() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/query_range")
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"matrix","result":[
                    {"metric":{},"values":[[100,"1"],[130,"2"],[160,"3"]]}]}}"#,
            )
            .create_async()
            .await;

        let to = Utc.timestamp_opt(160, 0).unwrap();
        let from = Utc.timestamp_opt(100, 0).unwrap();
        let result = source(&server)
            .query_range("counter", from, to, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(result.values(), vec![(100.0, 1.0), (130.0, 2.0), (160.0, 3.0)]);
    }

    #[tokio::test]
    async fn test_empty_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/query")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
            .create_async()
            .await;

        let result = source(&server).query("absent", Utc::now()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.first_value(), 0.0);
    }

    #[tokio::test]
    async fn test_query_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/query")
            .with_status(400)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let err = source(&server).query("sum(", Utc::now()).await.unwrap_err();
        assert!(matches!(err, SourceError::Query(ref msg) if msg == "parse error"));
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/query")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = source(&server).query("up", Utc::now()).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
    }
}
