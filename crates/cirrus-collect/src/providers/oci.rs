//! OCI: profiles → compartments → {instances, block volumes, backups, load
//! balancers, buckets, DB systems}.
//!
//! Monitoring queries are compartment-wide: one query per metric returns the
//! series of every resource of a namespace in the compartment. Each query task
//! builds partial per-resource audits; the compartment task alone merges them.

use crate::Collector;
use crate::auditor::ResourceAudit;
use crate::builder::{Finding, RecommendationBuilder};
use crate::error::{CollectError, SdkError};
use crate::fanout::{collect_flat, parallel_map};
use crate::policy::{MetricCheck, MetricQuery, OciPolicy};
use crate::providers::{Scope, compute_recommendation};
use crate::run::RunContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_metrics::{AuditError, AuditOutcome, MetricKind, MetricSeries, Scale, TimeWindow};
use cirrus_proto::{Detail, ErrorCategory, Profile, Provider, Recommendation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

// ─── SDK boundary ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciCompartment {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciInstance {
    pub id: String,
    pub name: String,
    pub shape: String,
    pub ocpus: u32,
    /// `RUNNING`, `STOPPED`, ...
    pub lifecycle_state: String,
    pub availability_domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciVolume {
    pub id: String,
    pub name: String,
    pub size_gb: u64,
    pub attached: bool,
    /// Performance units per GB: 0 lower cost, 10 balanced, 20 and up higher
    /// performance.
    #[serde(default = "default_vpus_per_gb")]
    pub vpus_per_gb: u32,
}

fn default_vpus_per_gb() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciSnapshot {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Backups taken by hand rather than by a backup policy.
    pub manual: bool,
    pub size_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciLoadBalancer {
    pub id: String,
    pub name: String,
    pub shape: String,
    /// Overall health: `OK`, `WARNING`, `CRITICAL` or `UNKNOWN`.
    pub health: String,
}

impl OciLoadBalancer {
    /// No backend set is serving traffic.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self.health.as_str(), "CRITICAL" | "UNKNOWN")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciBucket {
    pub id: String,
    pub name: String,
    pub auto_tiering: bool,
    #[serde(default)]
    pub approximate_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciDbNode {
    pub id: String,
    pub hostname: String,
    /// `AVAILABLE`, `STOPPED`, ...
    pub lifecycle_state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciDbSystem {
    pub id: String,
    pub name: String,
    pub shape: String,
    pub cpu_core_count: u32,
    pub lifecycle_state: String,
    #[serde(default)]
    pub nodes: Vec<OciDbNode>,
}

/// One resource's series out of a compartment-wide query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSeries {
    pub resource_id: String,
    pub series: MetricSeries,
}

/// Monitoring namespace a compartment-wide query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OciNamespace {
    /// `oci_computeagent`: instance CPU and memory.
    ComputeAgent,
    /// `oci_blockstore`: volume IOPS and throughput in MiB/s.
    BlockStore,
    /// `oci_database`: DB system CPU.
    Database,
}

#[async_trait]
pub trait OciSdk: Send + Sync {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn OciSession>, SdkError>;
}

#[async_trait]
pub trait OciSession: Send + Sync {
    async fn list_compartments(&self) -> Result<Vec<OciCompartment>, SdkError>;
    async fn list_instances(&self, compartment: &str) -> Result<Vec<OciInstance>, SdkError>;
    async fn list_volumes(&self, compartment: &str) -> Result<Vec<OciVolume>, SdkError>;
    async fn list_snapshots(&self, compartment: &str) -> Result<Vec<OciSnapshot>, SdkError>;
    async fn list_load_balancers(&self, compartment: &str) -> Result<Vec<OciLoadBalancer>, SdkError>;
    async fn list_buckets(&self, compartment: &str) -> Result<Vec<OciBucket>, SdkError>;
    async fn list_db_systems(&self, compartment: &str) -> Result<Vec<OciDbSystem>, SdkError>;

    /// Series for every resource of `namespace` in the compartment that
    /// reported samples.
    async fn summarize_metrics(
        &self,
        compartment: &str,
        namespace: OciNamespace,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<Vec<ResourceSeries>, SdkError>;
}

// ─── Volume performance ───────────────────────────────────────────────────────

/// Sustained IOPS and MiB/s of a block volume, each direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumePerformance {
    pub iops: f64,
    pub mibps: f64,
}

impl VolumePerformance {
    pub fn capacity(&self, metric: MetricKind) -> Scale {
        match metric {
            MetricKind::ReadIops | MetricKind::WriteIops => Scale::OfCapacity(self.iops),
            _ => Scale::OfCapacity(self.mibps),
        }
    }
}

/// Performance of a volume at `vpus_per_gb` and `size_gb`, capped at the
/// per-volume maximum of its tier. `None` for the lower cost tier, which has
/// nothing left to shed.
pub fn volume_performance(vpus_per_gb: u32, size_gb: u64) -> Option<VolumePerformance> {
    if vpus_per_gb == 0 {
        return None;
    }
    let vpus = f64::from(vpus_per_gb);
    let size = size_gb as f64;
    let iops_per_gb = (1.5 * vpus + 45.0).floor();
    let max_iops = 2_500.0 * vpus;
    let mibps_per_gb = (12.0 * vpus + 360.0) / 1_000.0;
    let max_mibps = 20.0 * vpus + 280.0;
    Some(VolumePerformance {
        iops: (iops_per_gb * size).min(max_iops),
        mibps: (mibps_per_gb * size).min(max_mibps),
    })
}

/// Bytes as a binary-unit size, one decimal.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

// ─── Collector ────────────────────────────────────────────────────────────────

pub struct OciCollector {
    sdk: Arc<dyn OciSdk>,
    policy: Arc<OciPolicy>,
}

impl OciCollector {
    pub fn new(sdk: Arc<dyn OciSdk>, policy: OciPolicy) -> Self {
        Self {
            sdk,
            policy: Arc::new(policy),
        }
    }
}

#[async_trait]
impl Collector for OciCollector {
    fn provider(&self) -> Provider {
        Provider::Oci
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
struct CompartmentTask {
    ctx: RunContext,
    session: Arc<dyn OciSession>,
    policy: Arc<OciPolicy>,
    scope: Scope,
    compartment_id: String,
}

impl CompartmentTask {
    fn report(&self, category: ErrorCategory, resource: &str, err: &CollectError) {
        self.ctx
            .errors()
            .report(Some(self.scope.profile_id), category, Some(resource), err);
    }
}

async fn collect_profile(
    ctx: RunContext,
    sdk: Arc<dyn OciSdk>,
    policy: Arc<OciPolicy>,
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
    let compartments = match ctx.call(session.list_compartments()).await {
        Ok(c) => c,
        Err(e) => {
            ctx.errors()
                .report(Some(profile.id), ErrorCategory::Hierarchy, None, &e);
            return Vec::new();
        }
    };
    info!(profile = %profile.name, compartments = compartments.len(), "oci compartments listed");

    let scope = Scope::new(profile.id, &profile.region);
    let limit = ctx.limits.max_concurrency;
    let rx = parallel_map(compartments, limit, move |compartment| {
        let task = CompartmentTask {
            ctx: ctx.clone(),
            session: session.clone(),
            policy: policy.clone(),
            scope: scope.with_unit(&compartment.id, &compartment.name),
            compartment_id: compartment.id,
        };
        async move { collect_compartment(task).await }
    });
    collect_flat(rx).await
}

async fn collect_compartment(task: CompartmentTask) -> Vec<Recommendation> {
    let (mut out, volumes, snapshots, load_balancers, buckets, databases) = tokio::join!(
        collect_instances(&task),
        collect_volumes(&task),
        collect_snapshots(&task),
        collect_load_balancers(&task),
        collect_buckets(&task),
        collect_databases(&task),
    );
    out.extend(volumes);
    out.extend(snapshots);
    out.extend(load_balancers);
    out.extend(buckets);
    out.extend(databases);
    out
}

async fn collect_instances(task: &CompartmentTask) -> Vec<Recommendation> {
    let instances = match task
        .ctx
        .call(task.session.list_instances(&task.compartment_id))
        .await
    {
        Ok(i) => i,
        Err(e) => {
            task.report(ErrorCategory::Listing, &task.compartment_id, &e);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    let mut running = Vec::new();
    for instance in instances {
        match instance.lifecycle_state.as_str() {
            "RUNNING" => running.push(instance),
            "STOPPED" => out.push(
                RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::ComputeStopped)
                    .resource(&instance.id, &instance.name)
                    .placement(task.scope.with_zone(&instance.availability_domain).placement)
                    .detail("Shape", &instance.shape)
                    .detail("State", &instance.lifecycle_state)
                    .build(),
            ),
            _ => {}
        }
    }
    if running.is_empty() {
        return out;
    }

    let checks = &task.policy.instance;
    let ids = running.iter().map(|i| i.id.clone()).collect();
    let mut audits = compartment_audits(task, OciNamespace::ComputeAgent, checks, ids, percent()).await;
    for instance in &running {
        let audit = audits
            .remove(&instance.id)
            .unwrap_or_else(|| ResourceAudit::new(checks));
        let rec = compute_recommendation(
            &task.ctx,
            &task.scope.with_zone(&instance.availability_domain),
            (&instance.id, &instance.name),
            checks,
            &audit,
            instance.ocpus >= task.policy.rightsizing_min_ocpus,
            vec![
                Detail::new("Shape", &instance.shape),
                Detail::new("OCPUs", instance.ocpus),
            ],
        );
        out.extend(rec);
    }
    out
}

// ─── Compartment-wide audits ──────────────────────────────────────────────────

/// Per-resource scale for a metric.
type ScaleFn = Arc<dyn Fn(&str, MetricKind) -> Scale + Send + Sync>;

fn percent() -> ScaleFn {
    Arc::new(|_: &str, _: MetricKind| Scale::Percent)
}

/// Judge every resource in `ids` on every check, one compartment-wide query
/// per check. The returned table holds an audit for each id.
async fn compartment_audits(
    task: &CompartmentTask,
    namespace: OciNamespace,
    checks: &[MetricCheck],
    ids: Vec<String>,
    scale: ScaleFn,
) -> HashMap<String, ResourceAudit> {
    let ids = Arc::new(ids);
    let all_checks = Arc::new(checks.to_vec());
    let query_task = task.clone();
    let query_ids = ids.clone();
    let mut rx = parallel_map(checks.to_vec(), task.ctx.limits.max_concurrency, move |check| {
        let task = query_task.clone();
        let ids = query_ids.clone();
        let all_checks = all_checks.clone();
        let scale = scale.clone();
        async move { query_check(&task, namespace, &all_checks, check, &ids, scale.as_ref()).await }
    });

    // Single writer for the per-resource audit table.
    let mut audits: HashMap<String, ResourceAudit> = HashMap::new();
    while let Some(partial) = rx.recv().await {
        for (id, audit) in partial {
            match audits.get_mut(&id) {
                Some(existing) => existing.merge(audit),
                None => {
                    audits.insert(id, audit);
                }
            }
        }
    }
    debug!(
        compartment = %task.compartment_id,
        ?namespace,
        resources = ids.len(),
        audited = audits.len(),
        "oci compartment metrics merged"
    );
    audits
}

/// Run one compartment-wide query and judge every listed resource on it.
/// Resources absent from the response have no samples for this metric.
async fn query_check(
    task: &CompartmentTask,
    namespace: OciNamespace,
    checks: &[MetricCheck],
    check: MetricCheck,
    ids: &[String],
    scale: &(dyn Fn(&str, MetricKind) -> Scale + Send + Sync),
) -> HashMap<String, ResourceAudit> {
    let window = task.ctx.window(check.query.lookback_days);
    let result = task
        .ctx
        .call(
            task.session
                .summarize_metrics(&task.compartment_id, namespace, check.query, window),
        )
        .await;

    let mut partial = HashMap::with_capacity(ids.len());
    match result {
        Ok(found) => {
            let mut by_id: HashMap<String, MetricSeries> = found
                .into_iter()
                .map(|r| (r.resource_id, r.series))
                .collect();
            for id in ids {
                let series = by_id.remove(id).unwrap_or_else(|| {
                    MetricSeries::empty(check.query.metric, check.query.aggregation, check.query.bucket_secs)
                });
                let mut audit = ResourceAudit::new(checks);
                if let Err(e) = audit.absorb(&check, &series, scale(id.as_str(), check.query.metric)) {
                    let category = match e {
                        AuditError::NoData(_) => ErrorCategory::MissingData,
                        AuditError::InvalidCapacity { .. } => ErrorCategory::MetricQuery,
                    };
                    task.report(category, id, &CollectError::from(e));
                }
                partial.insert(id.clone(), audit);
            }
        }
        Err(e) => {
            task.report(ErrorCategory::MetricQuery, &task.compartment_id, &e);
            for id in ids {
                let mut audit = ResourceAudit::new(checks);
                audit.mark_failed(check.query.metric);
                partial.insert(id.clone(), audit);
            }
        }
    }
    partial
}

// ─── Storage, network, data ───────────────────────────────────────────────────

async fn collect_volumes(task: &CompartmentTask) -> Vec<Recommendation> {
    let volumes = match task
        .ctx
        .call(task.session.list_volumes(&task.compartment_id))
        .await
    {
        Ok(v) => v,
        Err(e) => {
            task.report(ErrorCategory::Listing, &task.compartment_id, &e);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    let mut tuned = Vec::new();
    for volume in volumes {
        if !volume.attached {
            out.push(
                RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::StorageUnattached)
                    .resource(&volume.id, &volume.name)
                    .placement(task.scope.placement.clone())
                    .detail("Size GB", volume.size_gb)
                    .build(),
            );
        } else if let Some(perf) = volume_performance(volume.vpus_per_gb, volume.size_gb) {
            tuned.push((volume, perf));
        }
    }
    if tuned.is_empty() {
        return out;
    }

    let checks = &task.policy.volume;
    let limits: HashMap<String, VolumePerformance> =
        tuned.iter().map(|(v, perf)| (v.id.clone(), *perf)).collect();
    let ids = tuned.iter().map(|(v, _)| v.id.clone()).collect();
    let scale: ScaleFn = Arc::new(move |id: &str, metric: MetricKind| {
        limits
            .get(id)
            .map_or(Scale::OfCapacity(0.0), |perf| perf.capacity(metric))
    });
    let mut audits = compartment_audits(task, OciNamespace::BlockStore, checks, ids, scale).await;

    for (volume, perf) in &tuned {
        let Some(audit) = audits.remove(&volume.id) else {
            continue;
        };
        let AuditOutcome::Recommend { score } = audit.rightsizing.outcome() else {
            continue;
        };
        out.push(
            RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::StorageRightsizing)
                .resource(&volume.id, &volume.name)
                .placement(task.scope.placement.clone())
                .detail("VPU", volume.vpus_per_gb)
                .detail("Size", format!("{} GB", volume.size_gb))
                .detail("VPU Target", volume.vpus_per_gb.saturating_sub(10))
                .detail("Max IOPS", perf.iops)
                .detail("Max Throughput MiB/s", perf.mibps)
                .score(score)
                .evidence(checks, &audit.rightsizing)
                .build(),
        );
    }
    out
}

async fn collect_snapshots(task: &CompartmentTask) -> Vec<Recommendation> {
    let max_age = chrono::Duration::days(i64::from(task.policy.snapshot_max_age_days));
    let now = task.ctx.started_at;
    match task
        .ctx
        .call(task.session.list_snapshots(&task.compartment_id))
        .await
    {
        Ok(snapshots) => snapshots
            .iter()
            .filter(|s| s.manual && now - s.created_at > max_age)
            .map(|s| {
                RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::SnapshotOld)
                    .resource(&s.id, &s.name)
                    .placement(task.scope.placement.clone())
                    .detail("Age Days", (now - s.created_at).num_days())
                    .detail("Size GB", s.size_gb)
                    .build()
            })
            .collect(),
        Err(e) => {
            task.report(ErrorCategory::Listing, &task.compartment_id, &e);
            Vec::new()
        }
    }
}

async fn collect_load_balancers(task: &CompartmentTask) -> Vec<Recommendation> {
    match task
        .ctx
        .call(task.session.list_load_balancers(&task.compartment_id))
        .await
    {
        Ok(lbs) => lbs
            .iter()
            .filter(|lb| lb.is_unhealthy())
            .map(|lb| {
                RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::LoadBalancerInactive)
                    .resource(&lb.id, &lb.name)
                    .placement(task.scope.placement.clone())
                    .detail("Shape", &lb.shape)
                    .detail("Health", &lb.health)
                    .build()
            })
            .collect(),
        Err(e) => {
            task.report(ErrorCategory::Listing, &task.compartment_id, &e);
            Vec::new()
        }
    }
}

async fn collect_buckets(task: &CompartmentTask) -> Vec<Recommendation> {
    match task
        .ctx
        .call(task.session.list_buckets(&task.compartment_id))
        .await
    {
        Ok(buckets) => buckets
            .iter()
            .filter(|b| !b.auto_tiering)
            .map(|b| {
                RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::BucketTiering)
                    .resource(&b.id, &b.name)
                    .placement(task.scope.placement.clone())
                    .detail("Size", format_size(b.approximate_size))
                    .detail("Optimization", "Enable auto-tiering")
                    .build()
            })
            .collect(),
        Err(e) => {
            task.report(ErrorCategory::Listing, &task.compartment_id, &e);
            Vec::new()
        }
    }
}

/// Stopped DB nodes are reported one by one; fully available systems with
/// enough cores are audited on CPU.
async fn collect_databases(task: &CompartmentTask) -> Vec<Recommendation> {
    let systems = match task
        .ctx
        .call(task.session.list_db_systems(&task.compartment_id))
        .await
    {
        Ok(s) => s,
        Err(e) => {
            task.report(ErrorCategory::Listing, &task.compartment_id, &e);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    let mut sizable = Vec::new();
    for system in systems {
        let mut stopped = false;
        for node in system.nodes.iter().filter(|n| n.lifecycle_state == "STOPPED") {
            stopped = true;
            out.push(
                RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::DatabaseInactive)
                    .resource(&node.id, &node.hostname)
                    .placement(task.scope.placement.clone())
                    .detail("Hostname", &node.hostname)
                    .detail("CPU Core Count", system.cpu_core_count)
                    .detail("DB System", &system.name)
                    .build(),
            );
        }
        if !stopped
            && system.lifecycle_state == "AVAILABLE"
            && system.cpu_core_count >= task.policy.rightsizing_min_ocpus
        {
            sizable.push(system);
        }
    }
    if sizable.is_empty() {
        return out;
    }

    let checks = &task.policy.database;
    let ids = sizable.iter().map(|s| s.id.clone()).collect();
    let mut audits = compartment_audits(task, OciNamespace::Database, checks, ids, percent()).await;
    for system in &sizable {
        let Some(audit) = audits.remove(&system.id) else {
            continue;
        };
        let AuditOutcome::Recommend { score } = audit.rightsizing.outcome() else {
            continue;
        };
        out.push(
            RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::DatabaseOversized)
                .resource(&system.id, &system.name)
                .placement(task.scope.placement.clone())
                .detail("Shape", &system.shape)
                .detail("CPU Cores", system.cpu_core_count)
                .score(score)
                .evidence(checks, &audit.rightsizing)
                .build(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_volume_performance() {
        let perf = volume_performance(10, 100).expect("balanced");
        assert_eq!(perf.iops, 6_000.0);
        assert!((perf.mibps - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_performance_caps_at_tier_maximum() {
        let perf = volume_performance(10, 2_000).expect("balanced");
        assert_eq!(perf.iops, 25_000.0);
        assert_eq!(perf.mibps, 480.0);
        assert!(volume_performance(0, 2_000).is_none());
    }

    #[test]
    fn test_volume_capacity_by_metric() {
        let perf = VolumePerformance {
            iops: 6_000.0,
            mibps: 48.0,
        };
        assert_eq!(perf.capacity(MetricKind::WriteIops), Scale::OfCapacity(6_000.0));
        assert_eq!(perf.capacity(MetricKind::ReadThroughput), Scale::OfCapacity(48.0));
    }

    #[test]
    fn test_load_balancer_health() {
        let mut lb = OciLoadBalancer {
            id: "ocid1.loadbalancer.1".to_string(),
            name: "edge".to_string(),
            shape: "flexible".to_string(),
            health: "OK".to_string(),
        };
        assert!(!lb.is_unhealthy());
        lb.health = "UNKNOWN".to_string();
        assert!(lb.is_unhealthy());
        lb.health = "CRITICAL".to_string();
        assert!(lb.is_unhealthy());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
        assert_eq!(format_size(1536 * 1024 * 1024), "1.5 GiB");
    }
}
