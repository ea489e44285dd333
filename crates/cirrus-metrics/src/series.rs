//! Metric series, windows and bucket alignment.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ─── Metric Kinds ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    AvgCpu,
    MaxCpu,
    MaxMemory,
    ReadIops,
    WriteIops,
    ReadThroughput,
    WriteThroughput,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AvgCpu => "Cpu Average",
            Self::MaxCpu => "Cpu Max",
            Self::MaxMemory => "Memory Max",
            Self::ReadIops => "Max Read IOPS",
            Self::WriteIops => "Max Write IOPS",
            Self::ReadThroughput => "Max Read Throughput",
            Self::WriteThroughput => "Max Write Throughput",
        };
        f.write_str(label)
    }
}

/// Per-bucket aggregation applied when aligning raw samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Mean,
    Max,
    Min,
    Sum,
}

impl Aggregation {
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let out = match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Max => values.iter().copied().fold(f64::MIN, f64::max),
            Self::Min => values.iter().copied().fold(f64::MAX, f64::min),
            Self::Sum => values.iter().sum(),
        };
        Some(out)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mean => write!(f, "mean"),
            Self::Max => write!(f, "max"),
            Self::Min => write!(f, "min"),
            Self::Sum => write!(f, "sum"),
        }
    }
}

// ─── Windows ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` whole UTC days before `now`'s midnight.
    pub fn trailing_days(now: DateTime<Utc>, days: u32) -> Self {
        let end = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

// ─── Series ───────────────────────────────────────────────────────────────────

/// One aligned monitoring query result. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric: MetricKind,
    pub aggregation: Aggregation,
    pub bucket_secs: i64,
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    /// Wrap points that are already bucketed by the monitoring backend.
    pub fn new(
        metric: MetricKind,
        aggregation: Aggregation,
        bucket_secs: i64,
        mut points: Vec<MetricPoint>,
    ) -> Self {
        points.retain(|p| p.value.is_finite());
        points.sort_by_key(|p| p.timestamp);
        Self {
            metric,
            aggregation,
            bucket_secs,
            points,
        }
    }

    pub fn empty(metric: MetricKind, aggregation: Aggregation, bucket_secs: i64) -> Self {
        Self::new(metric, aggregation, bucket_secs, Vec::new())
    }

    /// Bucket raw samples into fixed `bucket_secs` slots starting at
    /// `window.start`, aggregating each slot. Samples outside the window and
    /// non-finite values are dropped; empty slots produce no point.
    pub fn align(
        metric: MetricKind,
        raw: impl IntoIterator<Item = MetricPoint>,
        window: TimeWindow,
        bucket_secs: i64,
        aggregation: Aggregation,
    ) -> Self {
        let bucket_secs = bucket_secs.max(1);
        let mut slots: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for point in raw {
            if !window.contains(point.timestamp) || !point.value.is_finite() {
                continue;
            }
            let offset = (point.timestamp - window.start).num_seconds();
            slots
                .entry(offset / bucket_secs)
                .or_default()
                .push(point.value);
        }

        let points = slots
            .into_iter()
            .filter_map(|(slot, values)| {
                let value = aggregation.apply(&values)?;
                let timestamp = window.start + Duration::seconds(slot * bucket_secs);
                Some(MetricPoint { timestamp, value })
            })
            .collect();

        Self {
            metric,
            aggregation,
            bucket_secs,
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    pub fn peak(&self) -> Option<f64> {
        Aggregation::Max.apply(&self.values().collect::<Vec<_>>())
    }

    pub fn mean(&self) -> Option<f64> {
        Aggregation::Mean.apply(&self.values().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).single().expect("valid date")
    }

    #[test]
    fn test_trailing_days_aligned_to_midnight() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 10, 14, 35, 12)
            .single()
            .expect("valid date");
        let window = TimeWindow::trailing_days(now, 5);
        assert_eq!(window.end, ts(10, 0));
        assert_eq!(window.start, ts(5, 0));
        assert_eq!(window.duration(), Duration::days(5));
        assert!(window.contains(ts(5, 0)));
        assert!(!window.contains(ts(10, 0)));
    }

    #[test]
    fn test_align_daily_max() {
        let window = TimeWindow::new(ts(1, 0), ts(4, 0));
        let raw = vec![
            MetricPoint::new(ts(1, 1), 10.0),
            MetricPoint::new(ts(1, 20), 30.0),
            MetricPoint::new(ts(2, 5), 5.0),
            MetricPoint::new(ts(3, 23), 7.0),
            MetricPoint::new(ts(4, 0), 99.0),
            MetricPoint::new(ts(3, 2), f64::NAN),
        ];
        let series = MetricSeries::align(MetricKind::MaxCpu, raw, window, 86_400, Aggregation::Max);
        let values: Vec<f64> = series.values().collect();
        assert_eq!(values, vec![30.0, 5.0, 7.0]);
        assert_eq!(series.points[1].timestamp, ts(2, 0));
    }

    #[test]
    fn test_align_mean_skips_empty_buckets() {
        let window = TimeWindow::new(ts(1, 0), ts(5, 0));
        let raw = vec![
            MetricPoint::new(ts(1, 3), 10.0),
            MetricPoint::new(ts(1, 9), 20.0),
            MetricPoint::new(ts(4, 9), 40.0),
        ];
        let series = MetricSeries::align(MetricKind::AvgCpu, raw, window, 86_400, Aggregation::Mean);
        assert_eq!(series.len(), 2);
        assert_eq!(series.mean(), Some(27.5));
        assert_eq!(series.peak(), Some(40.0));
    }

    #[test]
    fn test_aggregation_apply() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(Aggregation::Mean.apply(&values), Some(2.0));
        assert_eq!(Aggregation::Max.apply(&values), Some(3.0));
        assert_eq!(Aggregation::Min.apply(&values), Some(1.0));
        assert_eq!(Aggregation::Sum.apply(&values), Some(6.0));
        assert_eq!(Aggregation::Max.apply(&[]), None);
    }

    #[test]
    fn test_new_sorts_and_drops_non_finite() {
        let series = MetricSeries::new(
            MetricKind::ReadIops,
            Aggregation::Max,
            86_400,
            vec![
                MetricPoint::new(ts(3, 0), 3.0),
                MetricPoint::new(ts(1, 0), f64::INFINITY),
                MetricPoint::new(ts(2, 0), 2.0),
            ],
        );
        let values: Vec<f64> = series.values().collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }
}
