//! Per-resource verdict accumulation.
//!
//! Collectors that query metrics for many resources at once (one query per
//! metric per hierarchy unit) produce partial accumulators that a single
//! coordinating task merges. Each required metric of a resource is in one of
//! three states, so "never looked at" and "looked at, nothing there" stay
//! distinct.

use crate::audit::{AuditVerdict, combine};
use crate::series::MetricKind;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VisitState {
    Unvisited,
    NoData,
    Audited,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Unvisited,
    NoData(AuditVerdict),
    Audited(AuditVerdict),
}

impl Slot {
    fn state(&self) -> VisitState {
        match self {
            Self::Unvisited => VisitState::Unvisited,
            Self::NoData(_) => VisitState::NoData,
            Self::Audited(_) => VisitState::Audited,
        }
    }

    fn verdict(&self) -> Option<&AuditVerdict> {
        match self {
            Self::Unvisited => None,
            Self::NoData(v) | Self::Audited(v) => Some(v),
        }
    }

    /// Higher state wins. Two audited verdicts keep the stricter one.
    fn merge(self, other: Slot) -> Slot {
        match (self, other) {
            (Self::Audited(a), Self::Audited(b)) => Self::Audited(stricter(a, b)),
            (a, b) if b.state() > a.state() => b,
            (a, _) => a,
        }
    }
}

fn stricter(a: AuditVerdict, b: AuditVerdict) -> AuditVerdict {
    match (a.is_optimizable, b.is_optimizable) {
        (true, false) => b,
        (false, true) => a,
        _ if b.count > a.count => b,
        _ if b.count == a.count && b.retrieved_value > a.retrieved_value => b,
        _ => a,
    }
}

/// What a fully merged accumulator says about its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// Every required metric was visited and all are optimizable.
    Recommend { score: Option<u8> },
    /// Every required metric was visited and at least one is not optimizable.
    NotOptimizable,
    /// Every required metric was visited, none returned samples, and the
    /// missing-data policy of at least one of them blocks a recommendation.
    Unmonitored,
    /// At least one required metric was never audited.
    Incomplete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditAccumulator {
    slots: BTreeMap<MetricKind, Slot>,
    failed: BTreeSet<MetricKind>,
}

impl AuditAccumulator {
    pub fn new(required: impl IntoIterator<Item = MetricKind>) -> Self {
        Self {
            slots: required.into_iter().map(|m| (m, Slot::Unvisited)).collect(),
            failed: BTreeSet::new(),
        }
    }

    pub fn required(&self) -> impl Iterator<Item = MetricKind> + '_ {
        self.slots.keys().copied()
    }

    /// State of a metric. Metrics outside the required set read as unvisited.
    pub fn state(&self, metric: MetricKind) -> VisitState {
        self.slots
            .get(&metric)
            .map_or(VisitState::Unvisited, Slot::state)
    }

    /// Record a verdict. Returns `false` if the metric is not required.
    pub fn record(&mut self, verdict: AuditVerdict) -> bool {
        let Some(slot) = self.slots.get_mut(&verdict.metric) else {
            return false;
        };
        let incoming = if verdict.no_data {
            Slot::NoData(verdict)
        } else {
            Slot::Audited(verdict)
        };
        *slot = slot.merge(incoming);
        true
    }

    /// Note that the query for `metric` failed. The metric stays unvisited.
    pub fn mark_failed(&mut self, metric: MetricKind) {
        if self.slots.contains_key(&metric) {
            self.failed.insert(metric);
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = MetricKind> + '_ {
        self.failed.iter().copied()
    }

    /// Fold another partial accumulator for the same resource into this one.
    /// Commutative and idempotent over slot states.
    pub fn merge(&mut self, other: AuditAccumulator) {
        for (metric, incoming) in other.slots {
            let slot = self.slots.entry(metric).or_insert(Slot::Unvisited);
            *slot = slot.merge(incoming);
        }
        self.failed.extend(other.failed);
    }

    pub fn verdicts(&self) -> Vec<AuditVerdict> {
        self.slots.values().filter_map(Slot::verdict).copied().collect()
    }

    pub fn verdict(&self, metric: MetricKind) -> Option<&AuditVerdict> {
        self.slots.get(&metric).and_then(Slot::verdict)
    }

    pub fn outcome(&self) -> AuditOutcome {
        if self.slots.is_empty()
            || self
                .slots
                .values()
                .any(|s| s.state() == VisitState::Unvisited)
        {
            return AuditOutcome::Incomplete;
        }
        let combined = combine(&self.verdicts());
        let dark = self.slots.values().all(|s| s.state() == VisitState::NoData);
        if dark && !combined.optimizable {
            return AuditOutcome::Unmonitored;
        }
        if combined.optimizable {
            AuditOutcome::Recommend {
                score: combined.score,
            }
        } else {
            AuditOutcome::NotOptimizable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPUTE: [MetricKind; 3] = [MetricKind::AvgCpu, MetricKind::MaxCpu, MetricKind::MaxMemory];

    fn audited(metric: MetricKind, ok: bool, count: u32) -> AuditVerdict {
        AuditVerdict {
            metric,
            is_optimizable: ok,
            retrieved_value: Some(20.0),
            target_value: 50.0,
            count,
            threshold_count: 3,
            no_data: false,
        }
    }

    fn no_data(metric: MetricKind, ok: bool) -> AuditVerdict {
        AuditVerdict {
            metric,
            is_optimizable: ok,
            retrieved_value: None,
            target_value: 50.0,
            count: 0,
            threshold_count: 3,
            no_data: true,
        }
    }

    #[test]
    fn test_fresh_accumulator_is_incomplete() {
        let acc = AuditAccumulator::new(COMPUTE);
        assert_eq!(acc.state(MetricKind::AvgCpu), VisitState::Unvisited);
        assert_eq!(acc.outcome(), AuditOutcome::Incomplete);
        assert_eq!(AuditAccumulator::new([]).outcome(), AuditOutcome::Incomplete);
    }

    #[test]
    fn test_all_optimizable_recommends() {
        let mut acc = AuditAccumulator::new(COMPUTE);
        for m in COMPUTE {
            assert!(acc.record(audited(m, true, 0)));
        }
        assert_eq!(acc.outcome(), AuditOutcome::Recommend { score: Some(100) });
    }

    #[test]
    fn test_one_not_optimizable_blocks() {
        let mut acc = AuditAccumulator::new(COMPUTE);
        acc.record(audited(MetricKind::AvgCpu, true, 0));
        acc.record(audited(MetricKind::MaxCpu, false, 5));
        acc.record(audited(MetricKind::MaxMemory, true, 0));
        assert_eq!(acc.outcome(), AuditOutcome::NotOptimizable);
    }

    #[test]
    fn test_all_no_data_is_unmonitored() {
        let mut acc = AuditAccumulator::new(COMPUTE);
        for m in COMPUTE {
            acc.record(no_data(m, false));
        }
        assert_eq!(acc.state(MetricKind::MaxCpu), VisitState::NoData);
        assert_eq!(acc.outcome(), AuditOutcome::Unmonitored);
    }

    #[test]
    fn test_all_no_data_under_optimizable_policy_recommends() {
        let mut acc = AuditAccumulator::new([MetricKind::ReadIops, MetricKind::WriteIops]);
        acc.record(no_data(MetricKind::ReadIops, true));
        acc.record(no_data(MetricKind::WriteIops, true));
        assert_eq!(acc.outcome(), AuditOutcome::Recommend { score: Some(100) });
    }

    #[test]
    fn test_mixed_no_data_uses_policy_verdict() {
        let mut acc = AuditAccumulator::new(COMPUTE);
        acc.record(audited(MetricKind::AvgCpu, true, 1));
        acc.record(audited(MetricKind::MaxCpu, true, 0));
        acc.record(no_data(MetricKind::MaxMemory, true));
        assert!(matches!(acc.outcome(), AuditOutcome::Recommend { .. }));

        let mut acc = AuditAccumulator::new(COMPUTE);
        acc.record(audited(MetricKind::AvgCpu, true, 1));
        acc.record(audited(MetricKind::MaxCpu, true, 0));
        acc.record(no_data(MetricKind::MaxMemory, false));
        assert_eq!(acc.outcome(), AuditOutcome::NotOptimizable);
    }

    #[test]
    fn test_failed_metric_stays_unvisited() {
        let mut acc = AuditAccumulator::new(COMPUTE);
        acc.record(audited(MetricKind::AvgCpu, true, 0));
        acc.record(audited(MetricKind::MaxCpu, true, 0));
        acc.mark_failed(MetricKind::MaxMemory);
        assert_eq!(acc.state(MetricKind::MaxMemory), VisitState::Unvisited);
        assert_eq!(acc.failed().collect::<Vec<_>>(), vec![MetricKind::MaxMemory]);
        assert_eq!(acc.outcome(), AuditOutcome::Incomplete);
    }

    #[test]
    fn test_record_ignores_unrequired_metric() {
        let mut acc = AuditAccumulator::new([MetricKind::ReadIops]);
        assert!(!acc.record(audited(MetricKind::AvgCpu, true, 0)));
        assert_eq!(acc.verdicts().len(), 0);
    }

    #[test]
    fn test_merge_prefers_audited_and_is_commutative() {
        let mut a = AuditAccumulator::new(COMPUTE);
        a.record(no_data(MetricKind::AvgCpu, false));
        a.record(audited(MetricKind::MaxCpu, true, 1));

        let mut b = AuditAccumulator::new(COMPUTE);
        b.record(audited(MetricKind::AvgCpu, true, 0));
        b.record(audited(MetricKind::MaxCpu, false, 4));
        b.record(audited(MetricKind::MaxMemory, true, 0));

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b.clone();
        ba.merge(a.clone());

        assert_eq!(ab.state(MetricKind::AvgCpu), VisitState::Audited);
        assert_eq!(ab.verdict(MetricKind::MaxCpu).map(|v| v.count), Some(4));
        assert_eq!(ab.outcome(), AuditOutcome::NotOptimizable);
        assert_eq!(ab.verdicts(), ba.verdicts());

        let mut again = ab.clone();
        again.merge(ab.clone());
        assert_eq!(again, ab);
    }
}
