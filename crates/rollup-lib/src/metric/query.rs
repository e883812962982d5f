//! Query templates and scalar evaluation helpers

use crate::error::SourceError;
use crate::models::{ResourceUsage, ScopeKey};
use crate::source::MetricSource;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Placeholder replaced by the scope's label selector
pub const SELECTOR: &str = "{selector}";

/// Evaluation window of a getter call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryWindow {
    /// Value at one instant
    Instant(DateTime<Utc>),
    /// Average over `range` ending at `end`
    Average { end: DateTime<Utc>, range: Duration },
}

impl QueryWindow {
    /// Instant the query is evaluated at
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            QueryWindow::Instant(t) => *t,
            QueryWindow::Average { end, .. } => *end,
        }
    }

    /// Wrap an instant expression for this window
    pub fn wrap(&self, expr: &str) -> String {
        match self {
            QueryWindow::Instant(_) => expr.to_string(),
            QueryWindow::Average { range, .. } => {
                format!("avg_over_time(({})[{}s:])", expr, range.as_secs().max(1))
            }
        }
    }
}

/// Request/used/total templates of one resource at one level
#[derive(Debug, Clone, Copy)]
pub struct ResourceTemplates {
    pub request: &'static str,
    pub used: &'static str,
    pub total: &'static str,
}

/// The fixed template set of one cluster engine
#[derive(Debug, Clone, Copy)]
pub struct EngineTemplates {
    pub cluster_cpu: ResourceTemplates,
    pub cluster_memory: ResourceTemplates,
    pub namespace_cpu: ResourceTemplates,
    pub namespace_memory: ResourceTemplates,
    pub workload_cpu: ResourceTemplates,
    pub workload_memory: ResourceTemplates,
    pub instance_count: &'static str,
    pub node_count: &'static str,
    /// Monotonic counter of successful pod autoscaler rescales
    pub rescale_counter: Option<&'static str>,
    pub ca_scale_up_counter: Option<&'static str>,
    pub ca_scale_down_counter: Option<&'static str>,
}

/// Substitute the scope's selector into a template
pub fn render(template: &str, scope: &ScopeKey) -> String {
    template.replace(SELECTOR, &scope.label_selector())
}

/// Evaluate a template and read the first scalar
pub async fn scalar(
    source: &dyn MetricSource,
    template: &str,
    scope: &ScopeKey,
    window: &QueryWindow,
) -> Result<f64, SourceError> {
    let query = window.wrap(&render(template, scope));
    let result = source.query(&query, window.at()).await?;
    Ok(result.first_value())
}

/// Evaluate the request, used and total templates of one resource
pub async fn usage(
    source: &dyn MetricSource,
    templates: &ResourceTemplates,
    scope: &ScopeKey,
    window: &QueryWindow,
) -> Result<ResourceUsage, SourceError> {
    Ok(ResourceUsage {
        request: scalar(source, templates.request, scope, window).await?,
        used: scalar(source, templates.used, scope, window).await?,
        total: scalar(source, templates.total, scope, window).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClusterEngine;

    #[test]
    fn test_render_substitutes_selector() {
        let scope = ScopeKey::cluster("p1", "c1", ClusterEngine::K8s);
        assert_eq!(
            render("sum(up{job=\"x\",{selector}})", &scope),
            r#"sum(up{job="x",project_id="p1",cluster_id="c1"})"#
        );
    }

    #[test]
    fn test_average_window_wraps_expression() {
        let window = QueryWindow::Average {
            end: Utc::now(),
            range: Duration::from_secs(3600),
        };
        assert_eq!(window.wrap("sum(x)"), "avg_over_time((sum(x))[3600s:])");

        let instant = QueryWindow::Instant(Utc::now());
        assert_eq!(instant.wrap("sum(x)"), "sum(x)");
    }
}
