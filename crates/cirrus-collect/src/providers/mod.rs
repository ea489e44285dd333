//! Provider collection paths.
//!
//! Every path is the same layered walk: profiles, then the provider's
//! hierarchy (projects, compartments or resource kinds), then resources.
//! Each layer is one [`parallel_map`](crate::parallel_map) whose channel is
//! drained before the next layer starts.

pub mod aws;
pub mod gcp;
pub mod hetzner;
pub mod oci;

use crate::auditor::{Decision, ResourceAudit};
use crate::builder::RecommendationBuilder;
use crate::policy::MetricCheck;
use crate::run::RunContext;
use cirrus_proto::{Detail, Placement, ProfileId, Recommendation};

/// Profile and location handed down the fan-out layers.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub profile_id: ProfileId,
    pub placement: Placement,
}

impl Scope {
    pub fn new(profile_id: ProfileId, region: impl Into<String>) -> Self {
        Self {
            profile_id,
            placement: Placement {
                region: region.into(),
                ..Placement::default()
            },
        }
    }

    pub fn with_unit(&self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut scope = self.clone();
        scope.placement.unit_id = Some(id.into());
        scope.placement.unit_name = Some(name.into());
        scope
    }

    pub fn with_zone(&self, zone: impl Into<String>) -> Self {
        let mut scope = self.clone();
        scope.placement.zone = Some(zone.into());
        scope
    }
}

/// Turn an audited compute resource into its recommendation, if any. The
/// evidence lines come from the accumulator that produced the decision.
pub(crate) fn compute_recommendation(
    ctx: &RunContext,
    scope: &Scope,
    resource: (&str, &str),
    checks: &[MetricCheck],
    audit: &ResourceAudit,
    may_resize: bool,
    details: Vec<Detail>,
) -> Option<Recommendation> {
    let decision = audit.decide(may_resize);
    let (finding, score) = decision.compute_finding()?;
    let evidence = match (decision, audit.decommission.as_ref()) {
        (Decision::Decommission { .. }, Some(acc)) => acc,
        _ => &audit.rightsizing,
    };

    let mut builder = RecommendationBuilder::new(ctx, scope.profile_id, finding)
        .resource(resource.0, resource.1)
        .placement(scope.placement.clone())
        .score(score);
    for d in details {
        builder = builder.detail(d.label, d.value);
    }
    if decision != Decision::Unmonitored {
        builder = builder.evidence(checks, evidence);
    }
    Some(builder.build())
}
