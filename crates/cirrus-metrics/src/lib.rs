//! Time-series threshold auditing for cirrus.
//!
//! A provider collector fetches one [`MetricSeries`] per (resource, metric),
//! aligned into fixed buckets with a declared [`Aggregation`]. The auditor
//! counts buckets crossing a value threshold and turns the count into an
//! [`AuditVerdict`]. Verdicts for one resource are gathered in an
//! [`AuditAccumulator`] and AND-combined into a single outcome.

#![forbid(unsafe_code)]

pub mod accumulator;
pub mod audit;
pub mod series;

pub use accumulator::{AuditAccumulator, AuditOutcome, VisitState};
pub use audit::{
    AuditVerdict, Combined, NoDataPolicy, Scale, ThresholdRule, audit_series, combine,
    optimization_score,
};
pub use error::AuditError;
pub use series::{Aggregation, MetricKind, MetricPoint, MetricSeries, TimeWindow};

pub mod error {
    use crate::series::MetricKind;
    use thiserror::Error;

    #[derive(Debug, Clone, Error, PartialEq)]
    pub enum AuditError {
        #[error("no data for metric {0}")]
        NoData(MetricKind),

        #[error("invalid capacity {capacity} for metric {metric}")]
        InvalidCapacity { metric: MetricKind, capacity: f64 },
    }
}
