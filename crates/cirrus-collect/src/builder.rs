//! Recommendation construction.
//!
//! A provider path decides *what* it found ([`Finding`]); the category,
//! suggestion code and object type come from one fixed table per provider.

use crate::policy::MetricCheck;
use crate::run::RunContext;
use chrono::{DateTime, Utc};
use cirrus_metrics::AuditAccumulator;
use cirrus_proto::{
    Category, Detail, Generation, ObjectType, Placement, ProfileId, Provider, Recommendation,
    Suggestion,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finding {
    ComputeRightsizing,
    ComputeDecommission,
    ComputeStopped,
    ComputeUnmonitored,
    StorageRightsizing,
    StorageUnattached,
    SnapshotOld,
    LoadBalancerInactive,
    AddressUnassociated,
    DatabaseOversized,
    DatabaseInactive,
    BucketTiering,
}

impl Finding {
    pub fn classify(self, provider: Provider) -> (Category, Suggestion, ObjectType) {
        use Category as C;
        use ObjectType as O;
        use Suggestion as S;
        match (self, provider) {
            (Self::ComputeRightsizing, _) => (
                C::ComputeInstanceRightsizing,
                S::ResizeOversizedComputeInstance,
                O::ComputeInstance,
            ),
            (Self::ComputeDecommission, _) => (
                C::ComputeInstanceDecommissioning,
                S::DeleteComputeInstanceNotUsed,
                O::ComputeInstance,
            ),
            (Self::ComputeStopped, Provider::Oci) => (
                C::ComputeInstanceIdle,
                S::DeleteComputeInstanceNotActive,
                O::ComputeInstance,
            ),
            (Self::ComputeStopped, _) => (
                C::NotActiveResource,
                S::DeleteComputeInstanceNotActive,
                O::ComputeInstance,
            ),
            (Self::ComputeUnmonitored, _) => (
                C::ComputeInstanceWithoutMonitoring,
                S::EnableComputeInstanceMonitoring,
                O::ComputeInstance,
            ),
            (Self::StorageRightsizing, _) => (
                C::BlockStorageRightsizing,
                S::ResizeOversizedBlockStorage,
                O::BlockStorage,
            ),
            (Self::StorageUnattached, _) => {
                (C::UnusedStorage, S::DeleteBlockStorageNotUsed, O::BlockStorage)
            }
            (Self::SnapshotOld, _) => (C::OldSnapshot, S::DeleteSnapshotOlder, O::Snapshot),
            (Self::LoadBalancerInactive, Provider::Aws | Provider::Oci) => (
                C::UnusedResource,
                S::DeleteLoadBalancerNotActive,
                O::LoadBalancer,
            ),
            (Self::LoadBalancerInactive, _) => (
                C::NotActiveResource,
                S::DeleteLoadBalancerNotActive,
                O::LoadBalancer,
            ),
            (Self::AddressUnassociated, _) => {
                (C::UnusedResource, S::DeletePublicIpNotAssociated, O::PublicIp)
            }
            (Self::DatabaseOversized, _) => (
                C::OversizedDatabase,
                S::ResizeOversizedDatabaseInstance,
                O::DatabaseInstance,
            ),
            (Self::DatabaseInactive, Provider::Oci) => (
                C::UnusedServiceDecommissioning,
                S::DeleteDatabaseInstanceNotActive,
                O::DatabaseInstance,
            ),
            (Self::DatabaseInactive, _) => (
                C::NotActiveResource,
                S::DeleteDatabaseInstanceNotActive,
                O::DatabaseInstance,
            ),
            (Self::BucketTiering, _) => (
                C::ObjectStorageOptimization,
                S::EnableBucketAutoTiering,
                O::ObjectStorage,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecommendationBuilder {
    provider: Provider,
    generation: Generation,
    profile_id: ProfileId,
    finding: Finding,
    resource_id: String,
    resource_name: String,
    placement: Placement,
    details: Vec<Detail>,
    score: Option<u8>,
    created_at: DateTime<Utc>,
}

impl RecommendationBuilder {
    pub fn new(ctx: &RunContext, profile_id: ProfileId, finding: Finding) -> Self {
        Self {
            provider: ctx.provider,
            generation: ctx.generation,
            profile_id,
            finding,
            resource_id: String::new(),
            resource_name: String::new(),
            placement: Placement::default(),
            details: Vec::new(),
            score: None,
            created_at: ctx.started_at,
        }
    }

    pub fn resource(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.resource_id = id.into();
        self.resource_name = name.into();
        self
    }

    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn detail(mut self, label: impl Into<String>, value: impl std::fmt::Display) -> Self {
        self.details.push(Detail::new(label, value));
        self
    }

    pub fn score(mut self, score: Option<u8>) -> Self {
        self.score = score;
        self
    }

    /// One evidence line per check, in check order.
    pub fn evidence(mut self, checks: &[MetricCheck], acc: &AuditAccumulator) -> Self {
        for check in checks {
            if let Some(verdict) = acc.verdict(check.query.metric) {
                let label = format!("{} {}d", verdict.metric, check.query.lookback_days);
                let value = if verdict.no_data {
                    verdict.summary()
                } else if check.rule.is_ceiling() {
                    format!(
                        "max {:.2} (limit {:.2})",
                        verdict.retrieved_value.unwrap_or_default(),
                        verdict.target_value
                    )
                } else {
                    format!(
                        "thresholds reached (>{:.0}): {}",
                        verdict.target_value,
                        verdict.summary()
                    )
                };
                self.details.push(Detail { label, value });
            }
        }
        self
    }

    pub fn build(self) -> Recommendation {
        let (category, suggestion, object_type) = self.finding.classify(self.provider);
        Recommendation {
            id: Uuid::new_v4(),
            generation: self.generation,
            provider: self.provider,
            profile_id: self.profile_id,
            category,
            suggestion,
            resource_id: self.resource_id,
            resource_name: self.resource_name,
            object_type,
            placement: self.placement,
            details: self.details,
            optimization_score: self.score,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MetricQuery;
    use crate::run::Limits;
    use cirrus_metrics::{Aggregation, AuditVerdict, MetricKind, NoDataPolicy, ThresholdRule};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> RunContext {
        RunContext::new(Provider::Oci, Generation(12), Limits::default(), CancellationToken::new()).0
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(
            Finding::ComputeStopped.classify(Provider::Oci).0,
            Category::ComputeInstanceIdle
        );
        assert_eq!(
            Finding::ComputeStopped.classify(Provider::Aws).0,
            Category::NotActiveResource
        );
        assert_eq!(
            Finding::LoadBalancerInactive.classify(Provider::Aws).0,
            Category::UnusedResource
        );
        assert_eq!(
            Finding::LoadBalancerInactive.classify(Provider::Oci).0,
            Category::UnusedResource
        );
        assert_eq!(
            Finding::DatabaseInactive.classify(Provider::Oci).0,
            Category::UnusedServiceDecommissioning
        );
        assert_eq!(
            Finding::DatabaseInactive.classify(Provider::Aws).0,
            Category::NotActiveResource
        );
        assert_eq!(
            Finding::StorageRightsizing.classify(Provider::Gcp),
            (
                Category::BlockStorageRightsizing,
                Suggestion::ResizeOversizedBlockStorage,
                ObjectType::BlockStorage
            )
        );
    }

    #[test]
    fn test_build_tags_generation_and_keeps_detail_order() {
        let profile = ProfileId::new();
        let rec = RecommendationBuilder::new(&ctx(), profile, Finding::SnapshotOld)
            .resource("ocid1.bootvolumebackup.x", "nightly")
            .detail("Age Days", 45)
            .detail("Size GB", 50)
            .build();
        assert_eq!(rec.generation, Generation(12));
        assert_eq!(rec.profile_id, profile);
        assert_eq!(rec.category, Category::OldSnapshot);
        assert_eq!(rec.resource_name, "nightly");
        let labels: Vec<&str> = rec.details.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["Age Days", "Size GB"]);
    }

    #[test]
    fn test_records_of_one_run_share_its_start_time() {
        let ctx = ctx();
        let a = RecommendationBuilder::new(&ctx, ProfileId::new(), Finding::SnapshotOld).build();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = RecommendationBuilder::new(&ctx, ProfileId::new(), Finding::BucketTiering).build();
        assert_eq!(a.created_at, ctx.started_at);
        assert_eq!(b.created_at, a.created_at);
    }

    #[test]
    fn test_evidence_lines() {
        let checks = [
            MetricCheck::new(
                MetricQuery::new(MetricKind::AvgCpu, 90, 86_400, Aggregation::Mean),
                ThresholdRule::new(50.0, 3, NoDataPolicy::NotOptimizable),
            ),
            MetricCheck::new(
                MetricQuery::new(MetricKind::ReadIops, 5, 86_400, Aggregation::Max),
                ThresholdRule::ceiling(50.0, NoDataPolicy::Optimizable),
            ),
        ];
        let mut acc = AuditAccumulator::new([MetricKind::AvgCpu, MetricKind::ReadIops]);
        acc.record(AuditVerdict {
            metric: MetricKind::AvgCpu,
            is_optimizable: true,
            retrieved_value: Some(55.0),
            target_value: 50.0,
            count: 2,
            threshold_count: 3,
            no_data: false,
        });
        acc.record(AuditVerdict {
            metric: MetricKind::ReadIops,
            is_optimizable: true,
            retrieved_value: Some(120.0),
            target_value: 1500.0,
            count: 0,
            threshold_count: 1,
            no_data: false,
        });

        let rec = RecommendationBuilder::new(&ctx(), ProfileId::new(), Finding::ComputeRightsizing)
            .evidence(&checks, &acc)
            .build();
        assert_eq!(rec.details[0].label, "Cpu Average 90d");
        assert_eq!(rec.details[0].value, "thresholds reached (>50): 2/3");
        assert_eq!(rec.details[1].label, "Max Read IOPS 5d");
        assert_eq!(rec.details[1].value, "max 120.00 (limit 1500.00)");
    }
}
