//! AWS: profiles → resource kinds → resources.
//!
//! AWS has no project layer; the hierarchy step fans out over resource kinds
//! instead, each listed once per profile region. The number of resources of
//! each kind listed is recorded as the profile's inventory.

use crate::Collector;
use crate::auditor::audit_resource;
use crate::builder::{Finding, RecommendationBuilder};
use crate::error::{CollectError, SdkError};
use crate::fanout::{collect_all, collect_flat, parallel_map};
use crate::policy::{AwsPolicy, MetricQuery};
use crate::providers::{Scope, compute_recommendation};
use crate::run::RunContext;
use async_trait::async_trait;
use cirrus_metrics::{AuditOutcome, MetricKind, MetricSeries, Scale, TimeWindow};
use cirrus_proto::{Detail, ErrorCategory, ObjectCount, Profile, Provider, Recommendation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ─── SDK boundary ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsInstance {
    pub id: String,
    pub name: String,
    pub instance_type: String,
    pub vcpus: u32,
    /// EC2 state name: `running`, `stopped`, ...
    pub state: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsVolume {
    pub id: String,
    pub name: String,
    pub volume_type: String,
    pub size_gib: u64,
    /// Provisioned IOPS, when the volume type has them.
    #[serde(default)]
    pub iops: Option<u32>,
    #[serde(default)]
    pub throughput_mibps: Option<u32>,
    pub attached: bool,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsLoadBalancer {
    pub id: String,
    pub name: String,
    pub state: String,
    pub registered_targets: u32,
    pub healthy_targets: u32,
}

impl AwsLoadBalancer {
    pub fn is_inactive(&self) -> bool {
        self.state == "failed" || self.healthy_targets == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsAddress {
    pub allocation_id: String,
    pub public_ip: String,
    #[serde(default)]
    pub association_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsDatabase {
    pub id: String,
    pub class: String,
    pub status: String,
    pub vcpus: u32,
}

/// Database statuses in which the instance serves nothing but still bills.
const BROKEN_DB_STATUSES: [&str; 6] = [
    "stopped",
    "failed",
    "inaccessible-encryption-credentials",
    "incompatible-parameters",
    "incompatible-restore",
    "storage-full",
];

impl AwsDatabase {
    pub fn is_broken(&self) -> bool {
        BROKEN_DB_STATUSES.contains(&self.status.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsBucket {
    pub name: String,
    pub has_lifecycle: bool,
    pub object_count: u64,
    pub size_bytes: u64,
}

/// Which CloudWatch namespace a metric query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricTarget {
    Instance,
    Volume,
    Database,
}

#[async_trait]
pub trait AwsSdk: Send + Sync {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn AwsSession>, SdkError>;
}

#[async_trait]
pub trait AwsSession: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<AwsInstance>, SdkError>;
    async fn list_volumes(&self) -> Result<Vec<AwsVolume>, SdkError>;
    async fn list_load_balancers(&self) -> Result<Vec<AwsLoadBalancer>, SdkError>;
    async fn list_addresses(&self) -> Result<Vec<AwsAddress>, SdkError>;
    async fn list_databases(&self) -> Result<Vec<AwsDatabase>, SdkError>;
    async fn list_buckets(&self) -> Result<Vec<AwsBucket>, SdkError>;
    async fn count_vpcs(&self) -> Result<u64, SdkError>;
    async fn count_file_systems(&self) -> Result<u64, SdkError>;

    /// Volume metrics come back as per-second rates.
    async fn get_metric_statistics(
        &self,
        target: MetricTarget,
        resource_id: &str,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<MetricSeries, SdkError>;
}

// ─── Volume capacity ──────────────────────────────────────────────────────────

/// Total IOPS and MiB/s a volume can sustain. Provisioned values win;
/// otherwise the type's baseline applies. `None` for unknown types.
pub fn volume_capacity(volume: &AwsVolume) -> Option<(f64, f64)> {
    let baseline = match volume.volume_type.as_str() {
        "gp2" => {
            let iops = (volume.size_gib as f64 * 3.0).clamp(100.0, 16_000.0);
            (iops, 250.0)
        }
        "gp3" => (3_000.0, 125.0),
        "io1" | "io2" => (0.0, 1_000.0),
        "st1" => (500.0, 500.0),
        "sc1" => (250.0, 250.0),
        "standard" => (200.0, 90.0),
        _ => return None,
    };
    let iops = volume.iops.map_or(baseline.0, f64::from);
    let mibps = volume.throughput_mibps.map_or(baseline.1, f64::from);
    (iops > 0.0 && mibps > 0.0).then_some((iops, mibps))
}

// ─── Collector ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ResourceKind {
    Instances,
    Volumes,
    LoadBalancers,
    Addresses,
    Databases,
    Buckets,
    Vpcs,
    FileSystems,
}

impl ResourceKind {
    const ALL: [Self; 8] = [
        Self::Instances,
        Self::Volumes,
        Self::LoadBalancers,
        Self::Addresses,
        Self::Databases,
        Self::Buckets,
        Self::Vpcs,
        Self::FileSystems,
    ];

    /// Name in the profile's inventory.
    fn label(self) -> &'static str {
        match self {
            Self::Instances => "Instances",
            Self::Volumes => "Volumes",
            Self::LoadBalancers => "Load Balancers",
            Self::Addresses => "Elastic IPs",
            Self::Databases => "DB Instances",
            Self::Buckets => "Buckets",
            Self::Vpcs => "VPCs",
            Self::FileSystems => "File Systems",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instances => write!(f, "instances"),
            Self::Volumes => write!(f, "volumes"),
            Self::LoadBalancers => write!(f, "load_balancers"),
            Self::Addresses => write!(f, "addresses"),
            Self::Databases => write!(f, "databases"),
            Self::Buckets => write!(f, "buckets"),
            Self::Vpcs => write!(f, "vpcs"),
            Self::FileSystems => write!(f, "file_systems"),
        }
    }
}

pub struct AwsCollector {
    sdk: Arc<dyn AwsSdk>,
    policy: Arc<AwsPolicy>,
}

impl AwsCollector {
    pub fn new(sdk: Arc<dyn AwsSdk>, policy: AwsPolicy) -> Self {
        Self {
            sdk,
            policy: Arc::new(policy),
        }
    }
}

#[async_trait]
impl Collector for AwsCollector {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn collect(&self, profiles: Vec<Profile>, ctx: &RunContext) -> Vec<Recommendation> {
        let worker_ctx = ctx.clone();
        let sdk = self.sdk.clone();
        let policy = self.policy.clone();
        let rx = parallel_map(profiles, ctx.limits.max_concurrency, move |profile| {
            let ctx = worker_ctx.clone();
            let sdk = sdk.clone();
            let policy = policy.clone();
            async move { collect_profile(ctx, sdk, policy, profile).await }
        });
        collect_flat(rx).await
    }
}

#[derive(Clone)]
struct ProfileTask {
    ctx: RunContext,
    session: Arc<dyn AwsSession>,
    policy: Arc<AwsPolicy>,
    scope: Scope,
}

impl ProfileTask {
    fn listing_failed(&self, kind: ResourceKind, err: &CollectError) {
        let kind = kind.to_string();
        self.ctx.errors().report(
            Some(self.scope.profile_id),
            ErrorCategory::Listing,
            Some(kind.as_str()),
            err,
        );
    }

    async fn list<T>(
        &self,
        kind: ResourceKind,
        call: impl Future<Output = Result<Vec<T>, SdkError>>,
    ) -> Option<Vec<T>> {
        match self.ctx.call(call).await {
            Ok(items) => {
                debug!(%kind, count = items.len(), "aws resources listed");
                Some(items)
            }
            Err(e) => {
                self.listing_failed(kind, &e);
                None
            }
        }
    }
}

/// What one resource kind produced. `listed` is `None` when the kind could not
/// be enumerated.
struct KindReport {
    kind: ResourceKind,
    listed: Option<u64>,
    recommendations: Vec<Recommendation>,
}

impl KindReport {
    fn new(kind: ResourceKind, listed: usize, recommendations: Vec<Recommendation>) -> Self {
        Self {
            kind,
            listed: Some(listed as u64),
            recommendations,
        }
    }

    fn failed(kind: ResourceKind) -> Self {
        Self {
            kind,
            listed: None,
            recommendations: Vec::new(),
        }
    }
}

async fn collect_profile(
    ctx: RunContext,
    sdk: Arc<dyn AwsSdk>,
    policy: Arc<AwsPolicy>,
    profile: Profile,
) -> Vec<Recommendation> {
    let session = match ctx.call(sdk.new_session(&profile)).await {
        Ok(s) => s,
        Err(e) => {
            ctx.errors()
                .report(Some(profile.id), ErrorCategory::Session, None, &e);
            return Vec::new();
        }
    };
    info!(profile = %profile.name, region = %profile.region, "aws session established");

    let limit = ctx.limits.max_concurrency;
    let task = ProfileTask {
        ctx: ctx.clone(),
        session,
        policy,
        scope: Scope::new(profile.id, &profile.region),
    };
    let rx = parallel_map(ResourceKind::ALL.to_vec(), limit, move |kind| {
        let task = task.clone();
        async move { collect_kind(task, kind).await }
    });
    let mut reports = collect_all(rx).await;
    reports.sort_by_key(|r| r.kind);

    let counts: Vec<ObjectCount> = reports
        .iter()
        .filter_map(|r| r.listed.map(|n| ObjectCount::new(r.kind.label(), n)))
        .collect();
    if !counts.is_empty() && !ctx.is_cancelled() {
        ctx.record_inventory(profile.id, &profile.name, counts);
    }
    reports.into_iter().flat_map(|r| r.recommendations).collect()
}

async fn collect_kind(task: ProfileTask, kind: ResourceKind) -> KindReport {
    let limit = task.ctx.limits.max_concurrency;
    match kind {
        ResourceKind::Instances => {
            let Some(instances) = task.list(kind, task.session.list_instances()).await else {
                return KindReport::failed(kind);
            };
            let listed = instances.len();
            let rx = parallel_map(instances, limit, move |instance| {
                let task = task.clone();
                async move { audit_instance(&task, &instance).await.into_iter().collect::<Vec<_>>() }
            });
            KindReport::new(kind, listed, collect_flat(rx).await)
        }
        ResourceKind::Volumes => {
            let Some(volumes) = task.list(kind, task.session.list_volumes()).await else {
                return KindReport::failed(kind);
            };
            let listed = volumes.len();
            let rx = parallel_map(volumes, limit, move |volume| {
                let task = task.clone();
                async move { audit_volume(&task, &volume).await.into_iter().collect::<Vec<_>>() }
            });
            KindReport::new(kind, listed, collect_flat(rx).await)
        }
        ResourceKind::LoadBalancers => {
            let Some(lbs) = task.list(kind, task.session.list_load_balancers()).await else {
                return KindReport::failed(kind);
            };
            let recs = lbs
                .iter()
                .filter(|lb| lb.is_inactive())
                .map(|lb| {
                    RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::LoadBalancerInactive)
                        .resource(&lb.id, &lb.name)
                        .placement(task.scope.placement.clone())
                        .detail("State", &lb.state)
                        .detail("Healthy Targets", format!("{}/{}", lb.healthy_targets, lb.registered_targets))
                        .build()
                })
                .collect();
            KindReport::new(kind, lbs.len(), recs)
        }
        ResourceKind::Addresses => {
            let Some(addresses) = task.list(kind, task.session.list_addresses()).await else {
                return KindReport::failed(kind);
            };
            let recs = addresses
                .iter()
                .filter(|a| a.association_id.is_none())
                .map(|a| {
                    RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::AddressUnassociated)
                        .resource(&a.allocation_id, &a.public_ip)
                        .placement(task.scope.placement.clone())
                        .detail("Public IP", &a.public_ip)
                        .build()
                })
                .collect();
            KindReport::new(kind, addresses.len(), recs)
        }
        ResourceKind::Databases => {
            let Some(databases) = task.list(kind, task.session.list_databases()).await else {
                return KindReport::failed(kind);
            };
            let listed = databases.len();
            let rx = parallel_map(databases, limit, move |db| {
                let task = task.clone();
                async move { audit_database(&task, &db).await.into_iter().collect::<Vec<_>>() }
            });
            KindReport::new(kind, listed, collect_flat(rx).await)
        }
        ResourceKind::Buckets => {
            let Some(buckets) = task.list(kind, task.session.list_buckets()).await else {
                return KindReport::failed(kind);
            };
            let recs = buckets
                .iter()
                .filter(|b| !b.has_lifecycle && b.size_bytes >= task.policy.bucket_min_bytes)
                .map(|b| {
                    RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::BucketTiering)
                        .resource(&b.name, &b.name)
                        .placement(task.scope.placement.clone())
                        .detail("Size GB", b.size_bytes / 1_000_000_000)
                        .detail("Objects", b.object_count)
                        .build()
                })
                .collect();
            KindReport::new(kind, buckets.len(), recs)
        }
        ResourceKind::Vpcs => match task.ctx.call(task.session.count_vpcs()).await {
            Ok(n) => KindReport {
                kind,
                listed: Some(n),
                recommendations: Vec::new(),
            },
            Err(e) => {
                task.listing_failed(kind, &e);
                KindReport::failed(kind)
            }
        },
        ResourceKind::FileSystems => {
            let listed = match task.ctx.call(task.session.count_file_systems()).await {
                Ok(n) => Some(n),
                // Missing EFS permission counts as none.
                Err(CollectError::Sdk(e)) if e.is_access_denied() => {
                    warn!(profile = %task.scope.profile_id, error = %e, "no access to file systems, counted as 0");
                    Some(0)
                }
                Err(e) => {
                    task.listing_failed(kind, &e);
                    None
                }
            };
            KindReport {
                kind,
                listed,
                recommendations: Vec::new(),
            }
        }
    }
}

async fn audit_instance(task: &ProfileTask, instance: &AwsInstance) -> Option<Recommendation> {
    let scope = task.scope.with_zone(&instance.availability_zone);
    match instance.state.as_str() {
        "stopped" => Some(
            RecommendationBuilder::new(&task.ctx, scope.profile_id, Finding::ComputeStopped)
                .resource(&instance.id, &instance.name)
                .placement(scope.placement)
                .detail("Instance Type", &instance.instance_type)
                .detail("State", &instance.state)
                .build(),
        ),
        "running" => {
            let checks = &task.policy.instance;
            let audit = audit_resource(
                &task.ctx,
                scope.profile_id,
                &instance.id,
                checks,
                |_| Scale::Percent,
                |query, window| {
                    task.session
                        .get_metric_statistics(MetricTarget::Instance, &instance.id, query, window)
                },
            )
            .await;
            compute_recommendation(
                &task.ctx,
                &scope,
                (&instance.id, &instance.name),
                checks,
                &audit,
                instance.vcpus >= task.policy.rightsizing_min_vcpus,
                vec![
                    Detail::new("Instance Type", &instance.instance_type),
                    Detail::new("vCPUs", instance.vcpus),
                ],
            )
        }
        _ => None,
    }
}

async fn audit_volume(task: &ProfileTask, volume: &AwsVolume) -> Option<Recommendation> {
    let scope = task.scope.with_zone(&volume.availability_zone);
    if !volume.attached {
        return Some(
            RecommendationBuilder::new(&task.ctx, scope.profile_id, Finding::StorageUnattached)
                .resource(&volume.id, &volume.name)
                .placement(scope.placement)
                .detail("Volume Type", &volume.volume_type)
                .detail("Size GiB", volume.size_gib)
                .build(),
        );
    }

    let Some((iops, mibps)) = volume_capacity(volume) else {
        debug!(volume = %volume.id, volume_type = %volume.volume_type, "unknown volume type, skipped");
        return None;
    };
    let checks = &task.policy.volume;
    let audit = audit_resource(
        &task.ctx,
        scope.profile_id,
        &volume.id,
        checks,
        |metric| match metric {
            MetricKind::ReadIops | MetricKind::WriteIops => Scale::OfCapacity(iops),
            _ => Scale::OfCapacity(mibps),
        },
        |query, window| {
            task.session
                .get_metric_statistics(MetricTarget::Volume, &volume.id, query, window)
        },
    )
    .await;

    let AuditOutcome::Recommend { score } = audit.rightsizing.outcome() else {
        return None;
    };
    Some(
        RecommendationBuilder::new(&task.ctx, scope.profile_id, Finding::StorageRightsizing)
            .resource(&volume.id, &volume.name)
            .placement(scope.placement)
            .detail("Volume Type", &volume.volume_type)
            .detail("Provisioned IOPS", iops)
            .detail("Provisioned MiB/s", mibps)
            .score(score)
            .evidence(checks, &audit.rightsizing)
            .build(),
    )
}

async fn audit_database(task: &ProfileTask, db: &AwsDatabase) -> Option<Recommendation> {
    if db.is_broken() {
        return Some(
            RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::DatabaseInactive)
                .resource(&db.id, &db.id)
                .placement(task.scope.placement.clone())
                .detail("Class", &db.class)
                .detail("Status", &db.status)
                .build(),
        );
    }
    if db.status != "available" {
        return None;
    }

    let checks = &task.policy.database;
    let audit = audit_resource(
        &task.ctx,
        task.scope.profile_id,
        &db.id,
        checks,
        |_| Scale::Percent,
        |query, window| {
            task.session
                .get_metric_statistics(MetricTarget::Database, &db.id, query, window)
        },
    )
    .await;

    let AuditOutcome::Recommend { score } = audit.rightsizing.outcome() else {
        return None;
    };
    if db.vcpus < task.policy.rightsizing_min_vcpus {
        return None;
    }
    Some(
        RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::DatabaseOversized)
            .resource(&db.id, &db.id)
            .placement(task.scope.placement.clone())
            .detail("Class", &db.class)
            .detail("vCPUs", db.vcpus)
            .score(score)
            .evidence(checks, &audit.rightsizing)
            .build(),
    )
}
