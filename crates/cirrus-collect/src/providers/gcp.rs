//! GCP: profiles → projects → instances, with two branches per project.
//!
//! - instances → instance audit (CPU average, CPU max, memory max)
//! - instances → attached disks → disk audit against per-type IOPS and
//!   throughput limits; a disk attached to several instances is audited once

use crate::Collector;
use crate::auditor::audit_resource;
use crate::builder::{Finding, RecommendationBuilder};
use crate::error::SdkError;
use crate::fanout::{collect_flat, parallel_map};
use crate::policy::{GcpPolicy, MetricQuery};
use crate::providers::{Scope, compute_recommendation};
use crate::run::RunContext;
use async_trait::async_trait;
use cirrus_metrics::{AuditOutcome, MetricKind, MetricSeries, Scale, TimeWindow};
use cirrus_proto::{Credentials, Detail, ErrorCategory, Profile, Provider, Recommendation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

// ─── SDK boundary ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcpProject {
    pub project_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcpInstance {
    pub id: String,
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub vcpus: u32,
    #[serde(default)]
    pub shared_core: bool,
    pub status: String,
    /// Names of attached persistent disks.
    #[serde(default)]
    pub disks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcpDisk {
    pub id: String,
    pub name: String,
    pub zone: String,
    /// Short type name (`pd-balanced`) or full type URL.
    pub disk_type: String,
    pub size_gb: u64,
}

#[async_trait]
pub trait GcpSdk: Send + Sync {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn GcpSession>, SdkError>;
}

/// Read-only client bound to one profile; shared by every task of that profile.
#[async_trait]
pub trait GcpSession: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<GcpProject>, SdkError>;

    async fn list_instances(&self, project: &str) -> Result<Vec<GcpInstance>, SdkError>;

    async fn get_disk(&self, project: &str, zone: &str, name: &str) -> Result<GcpDisk, SdkError>;

    async fn query_series(
        &self,
        project: &str,
        resource_id: &str,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<MetricSeries, SdkError>;
}

// ─── Disk limits ──────────────────────────────────────────────────────────────

/// Per-VM persistent disk limits; IOPS and MiB/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskLimits {
    pub read_iops: f64,
    pub write_iops: f64,
    pub read_mibps: f64,
    pub write_mibps: f64,
}

impl DiskLimits {
    const fn new(read_iops: f64, write_iops: f64, read_mibps: f64, write_mibps: f64) -> Self {
        Self {
            read_iops,
            write_iops,
            read_mibps,
            write_mibps,
        }
    }

    pub fn capacity(&self, metric: MetricKind) -> Scale {
        match metric {
            MetricKind::ReadIops => Scale::OfCapacity(self.read_iops),
            MetricKind::WriteIops => Scale::OfCapacity(self.write_iops),
            MetricKind::ReadThroughput => Scale::OfCapacity(self.read_mibps),
            MetricKind::WriteThroughput => Scale::OfCapacity(self.write_mibps),
            _ => Scale::Percent,
        }
    }
}

/// Limits for a disk type on an instance with `vcpus` cores. `None` for disk
/// types without published limits (local SSD, hyperdisk).
pub fn disk_limits(disk_type: &str, vcpus: u32, shared_core: bool) -> Option<DiskLimits> {
    let short = disk_type.rsplit('/').next().unwrap_or(disk_type);
    let tier = match (shared_core, vcpus) {
        (true, _) | (false, 0..=1) => 0,
        (false, 2..=7) => 1,
        (false, 8..=15) => 2,
        (false, 16..=31) => 3,
        (false, _) => 4,
    };
    let limits = match (short, tier) {
        ("pd-standard", 0) => DiskLimits::new(1_000.0, 10_000.0, 200.0, 200.0),
        ("pd-standard", 1) => DiskLimits::new(3_000.0, 15_000.0, 240.0, 240.0),
        ("pd-standard", 2) => DiskLimits::new(5_000.0, 15_000.0, 800.0, 400.0),
        ("pd-standard", _) => DiskLimits::new(7_500.0, 15_000.0, 1_200.0, 400.0),
        ("pd-balanced", 0) => DiskLimits::new(6_000.0, 6_000.0, 240.0, 240.0),
        ("pd-balanced", 1 | 2) => DiskLimits::new(15_000.0, 15_000.0, 240.0, 240.0),
        ("pd-balanced", _) => DiskLimits::new(20_000.0, 20_000.0, 1_200.0, 1_200.0),
        ("pd-ssd", 0) => DiskLimits::new(6_000.0, 6_000.0, 240.0, 240.0),
        ("pd-ssd", 1) => DiskLimits::new(15_000.0, 15_000.0, 240.0, 240.0),
        ("pd-ssd", 2) => DiskLimits::new(15_000.0, 15_000.0, 800.0, 800.0),
        ("pd-ssd", 3) => DiskLimits::new(25_000.0, 25_000.0, 1_200.0, 1_200.0),
        ("pd-ssd", _) => DiskLimits::new(60_000.0, 30_000.0, 1_200.0, 1_200.0),
        _ => return None,
    };
    Some(limits)
}

// ─── Collector ────────────────────────────────────────────────────────────────

pub struct GcpCollector {
    sdk: Arc<dyn GcpSdk>,
    policy: Arc<GcpPolicy>,
}

impl GcpCollector {
    pub fn new(sdk: Arc<dyn GcpSdk>, policy: GcpPolicy) -> Self {
        Self {
            sdk,
            policy: Arc::new(policy),
        }
    }
}

#[async_trait]
impl Collector for GcpCollector {
    fn provider(&self) -> Provider {
        Provider::Gcp
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

/// Shared by every task below the profile layer.
#[derive(Clone)]
struct ProjectTask {
    ctx: RunContext,
    session: Arc<dyn GcpSession>,
    policy: Arc<GcpPolicy>,
    scope: Scope,
    project_id: String,
}

async fn collect_profile(
    ctx: RunContext,
    sdk: Arc<dyn GcpSdk>,
    policy: Arc<GcpPolicy>,
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

    let projects = match ctx.call(session.list_projects()).await {
        Ok(p) => p,
        Err(e) => {
            ctx.errors()
                .report(Some(profile.id), ErrorCategory::Hierarchy, None, &e);
            return Vec::new();
        }
    };
    let filter = match &profile.credentials {
        Credentials::Gcp { project_filter, .. } => project_filter.clone(),
        _ => None,
    };
    let projects: Vec<GcpProject> = projects
        .into_iter()
        .filter(|p| filter.as_deref().is_none_or(|f| p.project_id.contains(f)))
        .collect();
    info!(profile = %profile.name, projects = projects.len(), "gcp projects listed");

    let scope = Scope::new(profile.id, &profile.region);
    let limit = ctx.limits.max_concurrency;
    let rx = parallel_map(projects, limit, move |project| {
        let task = ProjectTask {
            ctx: ctx.clone(),
            session: session.clone(),
            policy: policy.clone(),
            scope: scope.with_unit(&project.project_id, &project.name),
            project_id: project.project_id,
        };
        async move { collect_project(task).await }
    });
    collect_flat(rx).await
}

async fn collect_project(task: ProjectTask) -> Vec<Recommendation> {
    let instances = match task
        .ctx
        .call(task.session.list_instances(&task.project_id))
        .await
    {
        Ok(i) => i,
        Err(e) => {
            task.ctx.errors().report(
                Some(task.scope.profile_id),
                ErrorCategory::Listing,
                Some(&task.project_id),
                &e,
            );
            return Vec::new();
        }
    };
    debug!(project = %task.project_id, instances = instances.len(), "gcp instances listed");

    let limit = task.ctx.limits.max_concurrency;
    let running: Vec<GcpInstance> = instances
        .iter()
        .filter(|i| i.status == "RUNNING")
        .cloned()
        .collect();

    let disks = attached_disks(&instances);
    let instance_task = task.clone();
    let instance_rx = parallel_map(running, limit, move |instance| {
        let task = instance_task.clone();
        async move { audit_instance(&task, &instance).await.into_iter().collect::<Vec<_>>() }
    });
    let disk_task = task.clone();
    let disk_rx = parallel_map(disks, limit, move |disk| {
        let task = disk_task.clone();
        async move { audit_disk(&task, &disk).await.into_iter().collect::<Vec<_>>() }
    });

    let (mut out, disks) = tokio::join!(collect_flat(instance_rx), collect_flat(disk_rx));
    out.extend(disks);
    out
}

/// A disk and every instance in the project it is attached to.
#[derive(Debug, Clone)]
struct AttachedDisk {
    zone: String,
    name: String,
    instances: Vec<GcpInstance>,
}

impl AttachedDisk {
    /// Limits of the attacher with the highest published limits.
    fn limits(&self, disk_type: &str) -> Option<DiskLimits> {
        self.instances
            .iter()
            .filter_map(|i| disk_limits(disk_type, i.vcpus, i.shared_core))
            .max_by(|a, b| a.read_iops.total_cmp(&b.read_iops))
    }

    fn attached_to(&self) -> String {
        self.instances
            .iter()
            .map(|i| i.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Unique disks in a project keyed by zone and name, in a stable order.
fn attached_disks(instances: &[GcpInstance]) -> Vec<AttachedDisk> {
    let mut by_key: BTreeMap<(&str, &str), Vec<GcpInstance>> = BTreeMap::new();
    for instance in instances {
        for name in &instance.disks {
            let attachers = by_key.entry((instance.zone.as_str(), name.as_str())).or_default();
            if !attachers.iter().any(|i| i.id == instance.id) {
                attachers.push(instance.clone());
            }
        }
    }
    by_key
        .into_iter()
        .map(|((zone, name), instances)| AttachedDisk {
            zone: zone.to_string(),
            name: name.to_string(),
            instances,
        })
        .collect()
}

async fn audit_instance(task: &ProjectTask, instance: &GcpInstance) -> Option<Recommendation> {
    let checks = &task.policy.instance;
    let audit = audit_resource(
        &task.ctx,
        task.scope.profile_id,
        &instance.id,
        checks,
        |_| Scale::Percent,
        |query, window| {
            task.session
                .query_series(&task.project_id, &instance.id, query, window)
        },
    )
    .await;

    let may_resize = instance.vcpus >= task.policy.rightsizing_min_vcpus && !instance.shared_core;
    compute_recommendation(
        &task.ctx,
        &task.scope.with_zone(&instance.zone),
        (&instance.id, &instance.name),
        checks,
        &audit,
        may_resize,
        vec![
            Detail::new("Machine Type", &instance.machine_type),
            Detail::new("vCPUs", instance.vcpus),
        ],
    )
}

async fn audit_disk(task: &ProjectTask, attached: &AttachedDisk) -> Option<Recommendation> {
    let disk = match task
        .ctx
        .call(task.session.get_disk(&task.project_id, &attached.zone, &attached.name))
        .await
    {
        Ok(d) => d,
        Err(e) => {
            task.ctx.errors().report(
                Some(task.scope.profile_id),
                ErrorCategory::Listing,
                Some(&attached.name),
                &e,
            );
            return None;
        }
    };
    let Some(limits) = attached.limits(&disk.disk_type) else {
        debug!(disk = %disk.name, disk_type = %disk.disk_type, "no published limits, disk skipped");
        return None;
    };

    let checks = &task.policy.disk;
    let audit = audit_resource(
        &task.ctx,
        task.scope.profile_id,
        &disk.id,
        checks,
        |metric| limits.capacity(metric),
        |query, window| {
            task.session
                .query_series(&task.project_id, &disk.id, query, window)
        },
    )
    .await;

    let AuditOutcome::Recommend { score } = audit.rightsizing.outcome() else {
        return None;
    };
    let rec = RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::StorageRightsizing)
        .resource(&disk.id, &disk.name)
        .placement(task.scope.with_zone(&disk.zone).placement)
        .detail("Disk Type", disk.disk_type.rsplit('/').next().unwrap_or(&disk.disk_type))
        .detail("Size GB", disk.size_gb)
        .detail("Attached To", attached.attached_to())
        .score(score)
        .evidence(checks, &audit.rightsizing)
        .build();
    Some(rec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_limits_by_core_range() {
        let small = disk_limits("pd-balanced", 4, false).expect("limits");
        assert_eq!(small.read_iops, 15_000.0);
        let shared = disk_limits("pd-balanced", 2, true).expect("limits");
        assert_eq!(shared.read_iops, 6_000.0);
        let large = disk_limits("pd-ssd", 64, false).expect("limits");
        assert_eq!(large.read_iops, 60_000.0);
    }

    #[test]
    fn test_disk_limits_accepts_type_urls() {
        let url = "https://www.googleapis.com/compute/v1/projects/p/zones/z/diskTypes/pd-standard";
        assert_eq!(disk_limits(url, 8, false), disk_limits("pd-standard", 8, false));
        assert!(disk_limits("local-ssd", 8, false).is_none());
    }

    fn instance(id: &str, vcpus: u32, disks: &[&str]) -> GcpInstance {
        GcpInstance {
            id: id.to_string(),
            name: format!("vm-{id}"),
            zone: "europe-west1-b".to_string(),
            machine_type: "n2-standard".to_string(),
            vcpus,
            shared_core: false,
            status: "RUNNING".to_string(),
            disks: disks.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_attached_disks_are_unique_per_zone() {
        let instances = vec![
            instance("1", 2, &["boot-1", "shared"]),
            instance("2", 16, &["shared"]),
        ];
        let disks = attached_disks(&instances);
        assert_eq!(disks.len(), 2);
        let shared = disks.iter().find(|d| d.name == "shared").expect("shared disk");
        assert_eq!(shared.instances.len(), 2);
        assert_eq!(shared.attached_to(), "vm-1, vm-2");

        let limits = shared.limits("pd-ssd").expect("limits");
        assert_eq!(limits.read_iops, 25_000.0);
    }

    #[test]
    fn test_capacity_maps_metric_to_limit() {
        let limits = DiskLimits::new(100.0, 200.0, 30.0, 40.0);
        assert_eq!(limits.capacity(MetricKind::WriteIops), Scale::OfCapacity(200.0));
        assert_eq!(limits.capacity(MetricKind::ReadThroughput), Scale::OfCapacity(30.0));
        assert_eq!(limits.capacity(MetricKind::AvgCpu), Scale::Percent);
    }
}
