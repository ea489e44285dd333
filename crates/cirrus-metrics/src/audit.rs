//! Threshold rules, verdicts and the AND-combination law.

use crate::error::AuditError;
use crate::series::{MetricKind, MetricSeries};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ─── Rules ────────────────────────────────────────────────────────────────────

/// What a metric reports when its series comes back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataPolicy {
    /// Absence of samples counts as idle.
    Optimizable,
    /// Absence of samples blocks any recommendation.
    NotOptimizable,
    /// Absence of samples is reported as a failure.
    Error,
}

/// How a rule's percentage maps onto series values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// Series values are already percentages.
    Percent,
    /// Series values are absolute; the percentage applies to this capacity.
    OfCapacity(f64),
}

/// A bucket crosses when its value is strictly above the target. The metric
/// is optimizable when fewer than `occurrences` buckets cross.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub value_pct: f64,
    pub occurrences: u32,
    pub no_data: NoDataPolicy,
}

impl ThresholdRule {
    pub fn new(value_pct: f64, occurrences: u32, no_data: NoDataPolicy) -> Self {
        Self {
            value_pct,
            occurrences,
            no_data,
        }
    }

    /// Every bucket must stay at or below the target.
    pub fn ceiling(value_pct: f64, no_data: NoDataPolicy) -> Self {
        Self::new(value_pct, 1, no_data)
    }

    pub fn is_ceiling(&self) -> bool {
        self.occurrences <= 1
    }

    pub fn target(&self, metric: MetricKind, scale: Scale) -> Result<f64, AuditError> {
        match scale {
            Scale::Percent => Ok(self.value_pct),
            Scale::OfCapacity(capacity) if capacity.is_finite() && capacity > 0.0 => {
                Ok(capacity * self.value_pct / 100.0)
            }
            Scale::OfCapacity(capacity) => Err(AuditError::InvalidCapacity { metric, capacity }),
        }
    }
}

// ─── Verdicts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuditVerdict {
    pub metric: MetricKind,
    pub is_optimizable: bool,
    /// Highest bucket value seen, `None` when the series was empty.
    pub retrieved_value: Option<f64>,
    pub target_value: f64,
    /// Buckets that crossed the target.
    pub count: u32,
    pub threshold_count: u32,
    pub no_data: bool,
}

impl AuditVerdict {
    /// How close the metric came to its limit, in percent.
    ///
    /// Count rules report crossings over allowed crossings; ceiling rules
    /// report the peak over the target.
    pub fn percentage(&self) -> f64 {
        if self.no_data {
            return 0.0;
        }
        if self.threshold_count > 1 {
            return f64::from(self.count) / f64::from(self.threshold_count) * 100.0;
        }
        match self.retrieved_value {
            Some(peak) if self.target_value > 0.0 => peak / self.target_value * 100.0,
            _ => 0.0,
        }
    }

    /// "2/3" for count rules, "120.00/1500.00" for ceilings.
    pub fn summary(&self) -> String {
        if self.no_data {
            return "NO DATA".to_string();
        }
        if self.threshold_count > 1 {
            format!("{}/{}", self.count, self.threshold_count)
        } else {
            format!(
                "{:.2}/{:.2}",
                self.retrieved_value.unwrap_or_default(),
                self.target_value
            )
        }
    }
}

/// Judge one series against one rule.
pub fn audit_series(
    series: &MetricSeries,
    rule: &ThresholdRule,
    scale: Scale,
) -> Result<AuditVerdict, AuditError> {
    let target = rule.target(series.metric, scale)?;

    if series.is_empty() {
        let is_optimizable = match rule.no_data {
            NoDataPolicy::Optimizable => true,
            NoDataPolicy::NotOptimizable => false,
            NoDataPolicy::Error => return Err(AuditError::NoData(series.metric)),
        };
        return Ok(AuditVerdict {
            metric: series.metric,
            is_optimizable,
            retrieved_value: None,
            target_value: target,
            count: 0,
            threshold_count: rule.occurrences,
            no_data: true,
        });
    }

    let count = series.values().filter(|v| *v > target).count();
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    let verdict = AuditVerdict {
        metric: series.metric,
        is_optimizable: count < rule.occurrences,
        retrieved_value: series.peak(),
        target_value: target,
        count,
        threshold_count: rule.occurrences,
        no_data: false,
    };
    debug!(
        metric = %series.metric,
        buckets = series.len(),
        count,
        target,
        optimizable = verdict.is_optimizable,
        "audited series"
    );
    Ok(verdict)
}

// ─── Combination ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Combined {
    pub optimizable: bool,
    pub score: Option<u8>,
}

/// AND across every verdict of one resource. No verdicts means no evidence,
/// which is never optimizable.
pub fn combine(verdicts: &[AuditVerdict]) -> Combined {
    let optimizable = !verdicts.is_empty() && verdicts.iter().all(|v| v.is_optimizable);
    Combined {
        optimizable,
        score: optimization_score(verdicts),
    }
}

/// `100 - mean(percentage)`, clamped to `0..=100`. Only defined when every
/// verdict is optimizable.
pub fn optimization_score(verdicts: &[AuditVerdict]) -> Option<u8> {
    if verdicts.is_empty() || !verdicts.iter().all(|v| v.is_optimizable) {
        return None;
    }
    let mean = verdicts.iter().map(AuditVerdict::percentage).sum::<f64>() / verdicts.len() as f64;
    Some((100.0 - mean).clamp(0.0, 100.0).round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Aggregation, MetricPoint};
    use chrono::{Duration, TimeZone, Utc};

    fn series(metric: MetricKind, values: &[f64]) -> MetricSeries {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("date");
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricPoint::new(start + Duration::days(i as i64), *v))
            .collect();
        MetricSeries::new(metric, Aggregation::Max, 86_400, points)
    }

    #[test]
    fn test_count_rule_below_occurrences_is_optimizable() {
        let rule = ThresholdRule::new(50.0, 3, NoDataPolicy::NotOptimizable);
        let s = series(MetricKind::AvgCpu, &[10.0, 60.0, 20.0, 70.0, 5.0]);
        let v = audit_series(&s, &rule, Scale::Percent).expect("audit");
        assert!(v.is_optimizable);
        assert_eq!(v.count, 2);
        assert_eq!(v.threshold_count, 3);
        assert_eq!(v.retrieved_value, Some(70.0));
        assert_eq!(v.summary(), "2/3");
    }

    #[test]
    fn test_count_rule_reaching_occurrences_is_not_optimizable() {
        let rule = ThresholdRule::new(50.0, 3, NoDataPolicy::NotOptimizable);
        let s = series(MetricKind::AvgCpu, &[60.0, 60.0, 60.0]);
        let v = audit_series(&s, &rule, Scale::Percent).expect("audit");
        assert!(!v.is_optimizable);
        assert_eq!(v.count, 3);
    }

    #[test]
    fn test_crossing_is_strict() {
        let rule = ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable);
        let s = series(MetricKind::ReadIops, &[1500.0, 1500.0]);
        let v = audit_series(&s, &rule, Scale::OfCapacity(3000.0)).expect("audit");
        assert!(v.is_optimizable);
        assert_eq!(v.target_value, 1500.0);
    }

    #[test]
    fn test_ceiling_rule_against_capacity() {
        let rule = ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable);
        let below = series(MetricKind::ReadIops, &[100.0, 900.0, 400.0]);
        let above = series(MetricKind::ReadIops, &[100.0, 1600.0]);

        let v = audit_series(&below, &rule, Scale::OfCapacity(3000.0)).expect("audit");
        assert!(v.is_optimizable);
        assert!((v.percentage() - 60.0).abs() < 1e-9);

        let v = audit_series(&above, &rule, Scale::OfCapacity(3000.0)).expect("audit");
        assert!(!v.is_optimizable);
    }

    #[test]
    fn test_no_data_policies() {
        let empty = series(MetricKind::WriteIops, &[]);

        let v = audit_series(
            &empty,
            &ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable),
            Scale::Percent,
        )
        .expect("audit");
        assert!(v.is_optimizable);
        assert!(v.no_data);
        assert_eq!(v.summary(), "NO DATA");

        let v = audit_series(
            &empty,
            &ThresholdRule::ceiling(50.0, NoDataPolicy::NotOptimizable),
            Scale::Percent,
        )
        .expect("audit");
        assert!(!v.is_optimizable);

        let err = audit_series(
            &empty,
            &ThresholdRule::ceiling(50.0, NoDataPolicy::Error),
            Scale::Percent,
        )
        .expect_err("no data is an error");
        assert_eq!(err, AuditError::NoData(MetricKind::WriteIops));
    }

    #[test]
    fn test_invalid_capacity() {
        let rule = ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable);
        let s = series(MetricKind::ReadThroughput, &[1.0]);
        let err = audit_series(&s, &rule, Scale::OfCapacity(0.0)).expect_err("zero capacity");
        assert!(matches!(err, AuditError::InvalidCapacity { .. }));
    }

    fn verdict(metric: MetricKind, ok: bool, count: u32) -> AuditVerdict {
        AuditVerdict {
            metric,
            is_optimizable: ok,
            retrieved_value: Some(10.0),
            target_value: 50.0,
            count,
            threshold_count: 4,
            no_data: false,
        }
    }

    #[test]
    fn test_combine_and_law() {
        let mut verdicts = vec![
            verdict(MetricKind::AvgCpu, true, 1),
            verdict(MetricKind::MaxCpu, true, 2),
            verdict(MetricKind::MaxMemory, true, 0),
        ];
        let combined = combine(&verdicts);
        assert!(combined.optimizable);
        assert_eq!(combined.score, Some(75));

        for i in 0..verdicts.len() {
            verdicts[i].is_optimizable = false;
            let combined = combine(&verdicts);
            assert!(!combined.optimizable);
            assert_eq!(combined.score, None);
            verdicts[i].is_optimizable = true;
        }
    }

    #[test]
    fn test_combine_empty_is_not_optimizable() {
        let combined = combine(&[]);
        assert!(!combined.optimizable);
        assert_eq!(combined.score, None);
    }

    #[test]
    fn test_score_clamped() {
        let mut v = verdict(MetricKind::ReadIops, true, 0);
        v.threshold_count = 1;
        v.retrieved_value = Some(500.0);
        v.target_value = 100.0;
        assert_eq!(optimization_score(&[v]), Some(0));
    }

    #[test]
    fn test_no_data_policy_serde() {
        let json = serde_json::to_string(&NoDataPolicy::NotOptimizable).expect("serialize");
        assert_eq!(json, "\"not_optimizable\"");
    }
}
