//! Per-resource metric auditing shared by every provider path.

use crate::builder::Finding;
use crate::error::{CollectError, SdkError};
use crate::policy::{MetricCheck, MetricQuery};
use crate::run::RunContext;
use cirrus_metrics::{
    AuditAccumulator, AuditError, AuditOutcome, MetricKind, MetricSeries, Scale, TimeWindow,
    audit_series,
};
use cirrus_proto::{ErrorCategory, ProfileId};
use futures_util::future::join_all;
use std::future::Future;

/// Rightsizing and (optional) decommissioning verdicts for one resource,
/// judged on the same series.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAudit {
    pub rightsizing: AuditAccumulator,
    pub decommission: Option<AuditAccumulator>,
}

/// What to do with an audited compute resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Decommission { score: Option<u8> },
    Rightsize { score: Option<u8> },
    Unmonitored,
    Keep,
    Incomplete,
}

impl Decision {
    /// Compute finding for this decision, if any.
    pub fn compute_finding(self) -> Option<(Finding, Option<u8>)> {
        match self {
            Self::Decommission { score } => Some((Finding::ComputeDecommission, score)),
            Self::Rightsize { score } => Some((Finding::ComputeRightsizing, score)),
            Self::Unmonitored => Some((Finding::ComputeUnmonitored, None)),
            Self::Keep | Self::Incomplete => None,
        }
    }
}

impl ResourceAudit {
    pub fn new(checks: &[MetricCheck]) -> Self {
        let metrics = || checks.iter().map(|c| c.query.metric);
        let decommission = (!checks.is_empty() && checks.iter().all(|c| c.decommission.is_some()))
            .then(|| AuditAccumulator::new(metrics()));
        Self {
            rightsizing: AuditAccumulator::new(metrics()),
            decommission,
        }
    }

    /// Judge `series` under both rule sets of `check`.
    pub fn absorb(
        &mut self,
        check: &MetricCheck,
        series: &MetricSeries,
        scale: Scale,
    ) -> Result<(), AuditError> {
        let verdict = match audit_series(series, &check.rule, scale) {
            Ok(v) => v,
            Err(e) => {
                self.mark_failed(check.query.metric);
                return Err(e);
            }
        };
        self.rightsizing.record(verdict);

        if let (Some(acc), Some(rule)) = (self.decommission.as_mut(), check.decommission.as_ref()) {
            match audit_series(series, rule, scale) {
                Ok(v) => {
                    acc.record(v);
                }
                Err(e) => {
                    acc.mark_failed(check.query.metric);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn mark_failed(&mut self, metric: MetricKind) {
        self.rightsizing.mark_failed(metric);
        if let Some(acc) = self.decommission.as_mut() {
            acc.mark_failed(metric);
        }
    }

    pub fn merge(&mut self, other: ResourceAudit) {
        self.rightsizing.merge(other.rightsizing);
        match (self.decommission.as_mut(), other.decommission) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.decommission = Some(theirs),
            _ => {}
        }
    }

    /// Decommissioning wins over rightsizing. Resources too small to shrink
    /// (`may_resize == false`) are only considered for decommissioning.
    pub fn decide(&self, may_resize: bool) -> Decision {
        if let Some(acc) = &self.decommission {
            if let AuditOutcome::Recommend { score } = acc.outcome() {
                return Decision::Decommission { score };
            }
        }
        match self.rightsizing.outcome() {
            AuditOutcome::Recommend { score } if may_resize => Decision::Rightsize { score },
            AuditOutcome::Recommend { .. } | AuditOutcome::NotOptimizable => Decision::Keep,
            AuditOutcome::Unmonitored => Decision::Unmonitored,
            AuditOutcome::Incomplete => Decision::Incomplete,
        }
    }
}

fn audit_error_category(err: &AuditError) -> ErrorCategory {
    match err {
        AuditError::NoData(_) => ErrorCategory::MissingData,
        AuditError::InvalidCapacity { .. } => ErrorCategory::MetricQuery,
    }
}

/// Fetch every check's series for one resource concurrently and judge them.
///
/// Failed queries and audit errors are reported to the run's error collector
/// and leave the metric unvisited, which blocks any recommendation.
pub async fn audit_resource<F, Fut, S>(
    ctx: &RunContext,
    profile: ProfileId,
    resource_id: &str,
    checks: &[MetricCheck],
    scale: S,
    fetch: F,
) -> ResourceAudit
where
    F: Fn(MetricQuery, TimeWindow) -> Fut,
    Fut: Future<Output = Result<MetricSeries, SdkError>>,
    S: Fn(MetricKind) -> Scale,
{
    let fetched = join_all(checks.iter().map(|check| {
        let window = ctx.window(check.query.lookback_days);
        ctx.call(fetch(check.query, window))
    }))
    .await;

    let mut audit = ResourceAudit::new(checks);
    for (check, result) in checks.iter().zip(fetched) {
        let metric = check.query.metric;
        match result {
            Ok(series) => {
                if let Err(e) = audit.absorb(check, &series, scale(metric)) {
                    let category = audit_error_category(&e);
                    ctx.errors()
                        .report(Some(profile), category, Some(resource_id), &CollectError::from(e));
                }
            }
            Err(e) => {
                audit.mark_failed(metric);
                ctx.errors()
                    .report(Some(profile), ErrorCategory::MetricQuery, Some(resource_id), &e);
            }
        }
    }
    audit
}
