//! Provider collectors for the cirrus auditing pipeline.
//!
//! A collection run for one provider:
//! 1. computes the run's generation once ([`run_generation`]),
//! 2. fans out over selected profiles, then hierarchy units, then resources,
//!    each layer bounded by [`parallel_map`],
//! 3. audits resource metrics and builds recommendations,
//! 4. bulk-writes recommendations and errors under that generation.
//!
//! Each provider path is a concrete [`Collector`] over its own SDK traits.
//! [`FixtureCloud`] backs those traits from a JSON description for offline
//! runs and tests; [`providers::hetzner::HetznerApi`] talks to the Hetzner
//! Cloud REST API directly.

#![forbid(unsafe_code)]

pub mod auditor;
pub mod builder;
pub mod error;
pub mod fanout;
pub mod fixture;
pub mod pipeline;
pub mod policy;
pub mod providers;
pub mod run;

use async_trait::async_trait;
use cirrus_proto::{Profile, Provider, Recommendation};

pub use auditor::{Decision, ResourceAudit, audit_resource};
pub use builder::{Finding, RecommendationBuilder};
pub use error::{CollectError, SdkError};
pub use fanout::{collect_all, collect_flat, parallel_map};
pub use fixture::FixtureCloud;
pub use pipeline::{RunError, RunOptions, RunSummary, run_generation};
pub use policy::{AuditPolicy, MetricCheck, MetricQuery};
pub use run::{ErrorCollector, Limits, RunContext, RunDrain};

/// One provider's collection path.
#[async_trait]
pub trait Collector: Send + Sync {
    fn provider(&self) -> Provider;

    /// Visit every profile and return the recommendations found. Non-fatal
    /// failures go to the run's error collector; this never fails as a whole.
    async fn collect(&self, profiles: Vec<Profile>, ctx: &RunContext) -> Vec<Recommendation>;
}
