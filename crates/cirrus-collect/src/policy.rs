//! Audit policy: which metrics each resource type is judged on, over which
//! window, and against which thresholds.
//!
//! Missing-data behavior is set per metric:
//! - CPU metrics: `not_optimizable`. An instance without CPU samples is never
//!   resized; if every metric is empty it is reported as unmonitored instead.
//! - GCP memory: `optimizable`. The memory metric needs the ops agent and is
//!   often absent on otherwise healthy instances.
//! - OCI memory: `not_optimizable`. OCI reports memory natively.
//! - Disk and volume IOPS/throughput: `optimizable`. Idle disks emit no
//!   samples.
//! - AWS database CPU: `error`. RDS always reports CPU, so an empty series is
//!   surfaced as a failure.
//! - OCI DB system CPU: `optimizable`. Database metrics need the management
//!   agent; a system without samples is reported for resizing.

use cirrus_metrics::{Aggregation, MetricKind, NoDataPolicy, ThresholdRule, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DAY: i64 = 86_400;
const HOUR: i64 = 3_600;
const MINUTE: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub metric: MetricKind,
    pub lookback_days: u32,
    pub bucket_secs: i64,
    pub aggregation: Aggregation,
}

impl MetricQuery {
    pub fn new(metric: MetricKind, lookback_days: u32, bucket_secs: i64, aggregation: Aggregation) -> Self {
        Self {
            metric,
            lookback_days,
            bucket_secs,
            aggregation,
        }
    }

    pub fn window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::trailing_days(now, self.lookback_days)
    }
}

/// One metric of a resource type. `decommission`, when set on every check of
/// a type, enables the stricter decommissioning verdict on the same series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricCheck {
    pub query: MetricQuery,
    pub rule: ThresholdRule,
    #[serde(default)]
    pub decommission: Option<ThresholdRule>,
}

impl MetricCheck {
    pub fn new(query: MetricQuery, rule: ThresholdRule) -> Self {
        Self {
            query,
            rule,
            decommission: None,
        }
    }

    pub fn with_decommission(mut self, rule: ThresholdRule) -> Self {
        self.decommission = Some(rule);
        self
    }
}

// ─── Provider Policies ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditPolicy {
    pub gcp: GcpPolicy,
    pub aws: AwsPolicy,
    pub oci: OciPolicy,
    pub hetzner: HetznerPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpPolicy {
    pub instance: Vec<MetricCheck>,
    /// Percent-of-limit ceilings, applied to the per-type, per-vCPU limits.
    pub disk: Vec<MetricCheck>,
    /// Instances below this vCPU count cannot shrink and are not resized.
    pub rightsizing_min_vcpus: u32,
}

impl Default for GcpPolicy {
    fn default() -> Self {
        let cpu = ThresholdRule::new(50.0, 3, NoDataPolicy::NotOptimizable);
        let disk = ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable);
        Self {
            instance: vec![
                MetricCheck::new(MetricQuery::new(MetricKind::AvgCpu, 90, DAY, Aggregation::Mean), cpu),
                MetricCheck::new(MetricQuery::new(MetricKind::MaxCpu, 7, DAY, Aggregation::Max), cpu),
                MetricCheck::new(
                    MetricQuery::new(MetricKind::MaxMemory, 7, DAY, Aggregation::Max),
                    ThresholdRule::new(50.0, 3, NoDataPolicy::Optimizable),
                ),
            ],
            disk: [
                MetricKind::ReadIops,
                MetricKind::WriteIops,
                MetricKind::ReadThroughput,
                MetricKind::WriteThroughput,
            ]
            .into_iter()
            .map(|m| MetricCheck::new(MetricQuery::new(m, 5, DAY, Aggregation::Max), disk))
            .collect(),
            rightsizing_min_vcpus: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsPolicy {
    pub instance: Vec<MetricCheck>,
    /// Ceilings against the volume's provisioned IOPS and throughput.
    pub volume: Vec<MetricCheck>,
    pub database: Vec<MetricCheck>,
    pub rightsizing_min_vcpus: u32,
    /// Buckets smaller than this are not worth a tiering change.
    pub bucket_min_bytes: u64,
}

impl Default for AwsPolicy {
    fn default() -> Self {
        let cpu = ThresholdRule::new(50.0, 4, NoDataPolicy::NotOptimizable);
        let idle = ThresholdRule::new(5.0, 4, NoDataPolicy::NotOptimizable);
        let volume = ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable);
        let db_cpu = ThresholdRule::new(50.0, 4, NoDataPolicy::Error);
        Self {
            instance: vec![
                MetricCheck::new(MetricQuery::new(MetricKind::AvgCpu, 7, HOUR, Aggregation::Mean), cpu)
                    .with_decommission(idle),
                MetricCheck::new(MetricQuery::new(MetricKind::MaxCpu, 7, HOUR, Aggregation::Max), cpu)
                    .with_decommission(idle),
            ],
            volume: [
                MetricKind::ReadIops,
                MetricKind::WriteIops,
                MetricKind::ReadThroughput,
                MetricKind::WriteThroughput,
            ]
            .into_iter()
            .map(|m| MetricCheck::new(MetricQuery::new(m, 5, DAY, Aggregation::Max), volume))
            .collect(),
            database: vec![
                MetricCheck::new(MetricQuery::new(MetricKind::AvgCpu, 7, HOUR, Aggregation::Mean), db_cpu),
                MetricCheck::new(MetricQuery::new(MetricKind::MaxCpu, 7, HOUR, Aggregation::Max), db_cpu),
            ],
            rightsizing_min_vcpus: 2,
            bucket_min_bytes: 500_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OciPolicy {
    pub instance: Vec<MetricCheck>,
    /// Ceilings against the volume's VPU-derived IOPS and throughput.
    pub volume: Vec<MetricCheck>,
    /// Ceiling on DB system CPU.
    pub database: Vec<MetricCheck>,
    /// Instances and DB systems below this core count are not resized.
    pub rightsizing_min_ocpus: u32,
    /// Manual backups older than this are reported.
    pub snapshot_max_age_days: u32,
}

impl Default for OciPolicy {
    fn default() -> Self {
        Self {
            instance: vec![
                MetricCheck::new(
                    MetricQuery::new(MetricKind::AvgCpu, 90, DAY, Aggregation::Mean),
                    ThresholdRule::new(50.0, 4, NoDataPolicy::NotOptimizable),
                )
                .with_decommission(ThresholdRule::new(5.0, 4, NoDataPolicy::NotOptimizable)),
                MetricCheck::new(
                    MetricQuery::new(MetricKind::MaxCpu, 7, MINUTE, Aggregation::Max),
                    ThresholdRule::new(50.0, 181, NoDataPolicy::NotOptimizable),
                )
                .with_decommission(ThresholdRule::new(5.0, 181, NoDataPolicy::NotOptimizable)),
                MetricCheck::new(
                    MetricQuery::new(MetricKind::MaxMemory, 7, MINUTE, Aggregation::Max),
                    ThresholdRule::new(90.0, 2, NoDataPolicy::NotOptimizable),
                )
                .with_decommission(ThresholdRule::new(40.0, 2, NoDataPolicy::NotOptimizable)),
            ],
            volume: [
                MetricKind::ReadIops,
                MetricKind::WriteIops,
                MetricKind::ReadThroughput,
                MetricKind::WriteThroughput,
            ]
            .into_iter()
            .map(|m| {
                MetricCheck::new(
                    MetricQuery::new(m, 5, DAY, Aggregation::Max),
                    ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable),
                )
            })
            .collect(),
            database: vec![MetricCheck::new(
                MetricQuery::new(MetricKind::MaxCpu, 7, HOUR, Aggregation::Max),
                ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable),
            )],
            rightsizing_min_ocpus: 2,
            snapshot_max_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HetznerPolicy {
    pub server: Vec<MetricCheck>,
    pub rightsizing_min_cores: u32,
}

impl Default for HetznerPolicy {
    fn default() -> Self {
        Self {
            server: vec![
                MetricCheck::new(
                    MetricQuery::new(MetricKind::AvgCpu, 14, DAY, Aggregation::Mean),
                    ThresholdRule::new(50.0, 3, NoDataPolicy::NotOptimizable),
                )
                .with_decommission(ThresholdRule::new(5.0, 3, NoDataPolicy::NotOptimizable)),
                MetricCheck::new(
                    MetricQuery::new(MetricKind::MaxCpu, 7, HOUR, Aggregation::Max),
                    ThresholdRule::new(80.0, 3, NoDataPolicy::NotOptimizable),
                )
                .with_decommission(ThresholdRule::new(10.0, 3, NoDataPolicy::NotOptimizable)),
            ],
            rightsizing_min_cores: 2,
        }
    }
}
