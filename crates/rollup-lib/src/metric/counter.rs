//! Event counts from resettable monotonic counters
//!
//! External counters (successful rescales, cluster autoscaler triggers) can
//! reset to zero when the exporting process restarts or the series is
//! evicted. A plain `current - start` under-counts after a reset, so the
//! estimator below inspects the range minimum, maximum and point coverage
//! before deciding which difference to trust.

use crate::error::SourceError;
use crate::source::{MetricSource, VectorResult};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Window and step of the continuity check
#[derive(Debug, Clone)]
pub struct CounterDeltaConfig {
    /// Trailing window inspected for min/max and point coverage
    pub window: Duration,
    /// Range query resolution
    pub step: Duration,
}

impl Default for CounterDeltaConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30 * 60),
            step: Duration::from_secs(30),
        }
    }
}

impl CounterDeltaConfig {
    /// Points a gap-free series yields over the window: `window / step + 1`
    pub fn expected_points(&self) -> usize {
        let step = self.step.as_secs().max(1);
        (self.window.as_secs() / step) as usize + 1
    }

    /// Window as a range literal, e.g. `1800s`
    pub fn window_literal(&self) -> String {
        format!("{}s", self.window.as_secs())
    }
}

/// Point samples of a counter at the window edges plus its range extrema
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterObservation {
    /// Value at the window start, `None` when the series had no data
    pub start: Option<f64>,
    /// Value at the window end, `None` when the series had no data
    pub current: Option<f64>,
    pub min_over_range: f64,
    pub max_over_range: f64,
}

/// Outcome of the first decision pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CounterDelta {
    Resolved(f64),
    /// Minimum sits at or below 1; point coverage decides between reset and steady low state
    NeedsContinuityCheck { start: f64, current: f64 },
}

impl CounterObservation {
    pub fn first_pass(&self) -> CounterDelta {
        match (self.start, self.current) {
            (None, None) => CounterDelta::Resolved(0.0),
            // Series began mid-window: everything observed is new
            (None, Some(current)) => CounterDelta::Resolved(current),
            // Series vanished: best effort from the highest value seen
            (Some(start), None) => CounterDelta::Resolved(self.max_over_range - start),
            (Some(start), Some(current)) if self.min_over_range > 1.0 => {
                CounterDelta::Resolved(current - start)
            }
            (Some(start), Some(current)) => CounterDelta::NeedsContinuityCheck { start, current },
        }
    }

    /// Second pass once the number of range points is known
    pub fn resolve_continuity(
        &self,
        start: f64,
        current: f64,
        observed_points: usize,
        expected_points: usize,
    ) -> f64 {
        if observed_points < expected_points {
            // Gap in the series, most likely a reset
            if self.max_over_range > start {
                self.max_over_range - start
            } else {
                current
            }
        } else {
            // Continuous series: a floor of 1 is the counter's steady low state
            current - 1.0
        }
    }
}

/// Clamp a delta to a non-negative event count
fn to_count(delta: f64) -> u64 {
    if delta.is_finite() && delta > 0.0 {
        delta.round() as u64
    } else {
        0
    }
}

/// Estimate the number of events a counter recorded over `[from, to]`
pub async fn estimate_counter_delta(
    source: &dyn MetricSource,
    counter: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    config: &CounterDeltaConfig,
) -> Result<u64, SourceError> {
    let start = source.query(counter, from).await?;
    let current = source.query(counter, to).await?;

    let window = config.window_literal();
    let min = source
        .query(&format!("min_over_time(({})[{}:])", counter, window), to)
        .await?;
    let max = source
        .query(&format!("max_over_time(({})[{}:])", counter, window), to)
        .await?;

    let observation = CounterObservation {
        start: (!start.is_empty()).then(|| start.first_value()),
        current: (!current.is_empty()).then(|| current.first_value()),
        min_over_range: min.first_value(),
        max_over_range: max.first_value(),
    };

    let delta = match observation.first_pass() {
        CounterDelta::Resolved(delta) => delta,
        CounterDelta::NeedsContinuityCheck { start, current } => {
            let window_start = to - chrono::Duration::seconds(config.window.as_secs() as i64);
            let range = source
                .query_range(counter, window_start, to, config.step)
                .await?;
            debug!(
                counter = %counter,
                observed = range.len(),
                expected = config.expected_points(),
                "Counter continuity check"
            );
            observation.resolve_continuity(start, current, range.len(), config.expected_points())
        }
    };

    Ok(to_count(delta))
}

/// Resample an irregular series onto the grid `origin + k * step <= end`.
///
/// Each grid point takes the value of the latest sample at or before it.
/// Grid points before the first sample are skipped. `points` must be
/// ordered by timestamp.
pub fn fill_metrics(points: &[(f64, f64)], origin: f64, end: f64, step: f64) -> Vec<(f64, f64)> {
    if step <= 0.0 || end < origin {
        return Vec::new();
    }

    // Tolerate float noise so a grid point landing exactly on `end` is kept
    let last_k = ((end - origin) / step + 1e-9).floor() as u64;
    let mut filled = Vec::new();
    let mut next = 0;
    let mut last = None;

    for k in 0..=last_k {
        let t = origin + k as f64 * step;
        while next < points.len() && points[next].0 <= t {
            last = Some(points[next].1);
            next += 1;
        }
        if let Some(value) = last {
            filled.push((t, value));
        }
    }

    filled
}

/// Sum of positive deltas between consecutive values. Decreases are treated
/// as counter resets and contribute nothing.
pub fn increasing_interval_difference(values: &[f64]) -> f64 {
    values
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|delta| *delta > 0.0)
        .sum()
}

/// Count events in a range result by resampling and summing increases
pub fn count_increases(
    result: &VectorResult,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    step: Duration,
) -> u64 {
    let origin = from.timestamp_millis() as f64 / 1000.0;
    let end = to.timestamp_millis() as f64 / 1000.0;
    let grid = fill_metrics(&result.values(), origin, end, step.as_secs_f64());
    let values: Vec<f64> = grid.into_iter().map(|(_, v)| v).collect();
    to_count(increasing_interval_difference(&values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SamplePoint, ScalarResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;

    #[test]
    fn test_expected_points_default() {
        assert_eq!(CounterDeltaConfig::default().expected_points(), 61);
    }

    #[test]
    fn test_no_data_anywhere_is_zero() {
        let obs = CounterObservation {
            start: None,
            current: None,
            min_over_range: 0.0,
            max_over_range: 0.0,
        };
        assert_eq!(obs.first_pass(), CounterDelta::Resolved(0.0));
    }

    #[test]
    fn test_series_started_mid_window() {
        let obs = CounterObservation {
            start: None,
            current: Some(6.0),
            min_over_range: 1.0,
            max_over_range: 6.0,
        };
        assert_eq!(obs.first_pass(), CounterDelta::Resolved(6.0));
    }

    #[test]
    fn test_series_vanished_uses_max() {
        let obs = CounterObservation {
            start: Some(3.0),
            current: None,
            min_over_range: 3.0,
            max_over_range: 9.0,
        };
        assert_eq!(obs.first_pass(), CounterDelta::Resolved(6.0));
    }

    #[test]
    fn test_high_minimum_assumes_continuity() {
        let obs = CounterObservation {
            start: Some(10.0),
            current: Some(14.0),
            min_over_range: 10.0,
            max_over_range: 14.0,
        };
        assert_eq!(obs.first_pass(), CounterDelta::Resolved(4.0));
    }

    #[test]
    fn test_continuous_low_series_subtracts_floor() {
        // 0,1,2,3,4,5 with full coverage
        let obs = CounterObservation {
            start: Some(0.0),
            current: Some(5.0),
            min_over_range: 0.0,
            max_over_range: 5.0,
        };
        let CounterDelta::NeedsContinuityCheck { start, current } = obs.first_pass() else {
            panic!("expected continuity check");
        };
        assert_eq!(obs.resolve_continuity(start, current, 61, 61), 4.0);
    }

    #[test]
    fn test_gap_uses_max_minus_start() {
        let obs = CounterObservation {
            start: Some(2.0),
            current: Some(1.0),
            min_over_range: 1.0,
            max_over_range: 20.0,
        };
        let CounterDelta::NeedsContinuityCheck { start, current } = obs.first_pass() else {
            panic!("expected continuity check");
        };
        assert_eq!(obs.resolve_continuity(start, current, 40, 61), 18.0);
    }

    #[test]
    fn test_gap_without_higher_max_uses_current() {
        let obs = CounterObservation {
            start: Some(5.0),
            current: Some(1.0),
            min_over_range: 1.0,
            max_over_range: 5.0,
        };
        assert_eq!(obs.resolve_continuity(5.0, 1.0, 10, 61), 1.0);
    }

    #[test]
    fn test_increasing_interval_difference() {
        assert_eq!(
            increasing_interval_difference(&[0.0, 1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 0.0]),
            5.0
        );
        assert_eq!(increasing_interval_difference(&[]), 0.0);
        assert_eq!(increasing_interval_difference(&[3.0]), 0.0);
    }

    #[test]
    fn test_fill_metrics_grid() {
        // Three irregular samples spanning 130s, resampled every 30s from t=0
        let points = [(10.0, 1.0), (45.0, 2.0), (140.0, 3.0)];
        let grid = fill_metrics(&points, 0.0, 140.0, 30.0);

        assert_eq!(
            grid,
            vec![(30.0, 1.0), (60.0, 2.0), (90.0, 2.0), (120.0, 2.0)]
        );
    }

    #[test]
    fn test_fill_metrics_rejects_bad_step() {
        assert!(fill_metrics(&[(0.0, 1.0)], 0.0, 60.0, 0.0).is_empty());
        assert!(fill_metrics(&[(0.0, 1.0)], 60.0, 0.0, 30.0).is_empty());
    }

    #[test]
    fn test_count_increases_ignores_resets() {
        let from = Utc.timestamp_opt(0, 0).unwrap();
        let to = Utc.timestamp_opt(150, 0).unwrap();
        let result = VectorResult::new(vec![
            SamplePoint::new(0.0, "3"),
            SamplePoint::new(30.0, "5"),
            SamplePoint::new(60.0, "0"),
            SamplePoint::new(120.0, "2"),
        ]);
        // grid: 3,5,0,0,2,2 -> +2 +2
        assert_eq!(count_increases(&result, from, to, Duration::from_secs(30)), 4);
    }

    /// Answers instant queries from a table and range queries with a fixed point count
    struct ScriptedSource {
        instant: HashMap<String, Option<f64>>,
        range_points: usize,
    }

    #[async_trait]
    impl MetricSource for ScriptedSource {
        async fn query(&self, query: &str, at: DateTime<Utc>) -> Result<ScalarResult, SourceError> {
            let key = if query.starts_with("min_over_time") {
                "min".to_string()
            } else if query.starts_with("max_over_time") {
                "max".to_string()
            } else {
                format!("{}@{}", query, at.timestamp())
            };
            let points = match self.instant.get(&key).copied().flatten() {
                Some(v) => vec![SamplePoint::new(at.timestamp() as f64, v.to_string())],
                None => vec![],
            };
            Ok(ScalarResult::new(points))
        }

        async fn query_range(
            &self,
            _query: &str,
            from: DateTime<Utc>,
            _to: DateTime<Utc>,
            step: Duration,
        ) -> Result<VectorResult, SourceError> {
            let points = (0..self.range_points)
                .map(|i| {
                    let ts = from.timestamp() as f64 + i as f64 * step.as_secs_f64();
                    SamplePoint::new(ts, "1")
                })
                .collect();
            Ok(VectorResult::new(points))
        }
    }

    fn scripted(start: Option<f64>, current: Option<f64>, min: f64, max: f64, points: usize) -> ScriptedSource {
        let mut instant = HashMap::new();
        instant.insert("rescales@0".to_string(), start);
        instant.insert("rescales@1800".to_string(), current);
        instant.insert("min".to_string(), Some(min));
        instant.insert("max".to_string(), Some(max));
        ScriptedSource {
            instant,
            range_points: points,
        }
    }

    #[tokio::test]
    async fn test_estimate_continuous_series() {
        let source = scripted(Some(0.0), Some(5.0), 0.0, 5.0, 61);
        let from = Utc.timestamp_opt(0, 0).unwrap();
        let to = Utc.timestamp_opt(1800, 0).unwrap();

        let delta = estimate_counter_delta(&source, "rescales", from, to, &CounterDeltaConfig::default())
            .await
            .unwrap();
        assert_eq!(delta, 4);
    }

    #[tokio::test]
    async fn test_estimate_reset_series() {
        let source = scripted(Some(2.0), Some(1.0), 1.0, 20.0, 35);
        let from = Utc.timestamp_opt(0, 0).unwrap();
        let to = Utc.timestamp_opt(1800, 0).unwrap();

        let delta = estimate_counter_delta(&source, "rescales", from, to, &CounterDeltaConfig::default())
            .await
            .unwrap();
        assert_eq!(delta, 18);
    }

    #[tokio::test]
    async fn test_estimate_clamps_negative() {
        let source = scripted(Some(9.0), Some(4.0), 4.0, 9.0, 61);
        let from = Utc.timestamp_opt(0, 0).unwrap();
        let to = Utc.timestamp_opt(1800, 0).unwrap();

        let delta = estimate_counter_delta(&source, "rescales", from, to, &CounterDeltaConfig::default())
            .await
            .unwrap();
        assert_eq!(delta, 0);
    }
}
