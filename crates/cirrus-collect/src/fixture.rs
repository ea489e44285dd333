//! JSON-described clouds for offline runs and tests.
//!
//! Accounts are keyed by profile name. Metric values are bucket values,
//! oldest first, laid out so the last one falls in the last bucket of the
//! queried window.

use crate::error::SdkError;
use crate::policy::MetricQuery;
use crate::providers::aws::{
    AwsAddress, AwsBucket, AwsDatabase, AwsInstance, AwsLoadBalancer, AwsSdk, AwsSession, AwsVolume,
    MetricTarget,
};
use crate::providers::gcp::{GcpDisk, GcpInstance, GcpProject, GcpSdk, GcpSession};
use crate::providers::hetzner::{
    HetznerPrimaryIp, HetznerSdk, HetznerServer, HetznerSession, HetznerVolume,
};
use crate::providers::oci::{
    OciBucket, OciCompartment, OciDbSystem, OciInstance, OciLoadBalancer, OciNamespace, OciSdk,
    OciSession, OciSnapshot, OciVolume, ResourceSeries,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Duration;
use cirrus_metrics::{MetricKind, MetricPoint, MetricSeries, TimeWindow};
use cirrus_proto::Profile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureCloud {
    pub accounts: HashMap<String, FixtureAccount>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureAccount {
    /// Reject session creation with this message.
    pub fail_session: Option<String>,
    /// Listing names that fail: `projects`, `instances`, `volumes`, ...
    pub failing_listings: Vec<String>,
    /// Resource ids (or OCI compartment ids) whose metric queries fail.
    pub failing_metrics: Vec<String>,
    /// resource id → metric → bucket values.
    pub series: HashMap<String, HashMap<MetricKind, Vec<f64>>>,
    pub gcp: GcpFixture,
    pub aws: AwsFixture,
    pub oci: OciFixture,
    pub hetzner: HetznerFixture,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpFixture {
    pub projects: Vec<GcpProject>,
    /// project id → instances.
    pub instances: HashMap<String, Vec<GcpInstance>>,
    /// project id → disks.
    pub disks: HashMap<String, Vec<GcpDisk>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsFixture {
    pub instances: Vec<AwsInstance>,
    pub volumes: Vec<AwsVolume>,
    pub load_balancers: Vec<AwsLoadBalancer>,
    pub addresses: Vec<AwsAddress>,
    pub databases: Vec<AwsDatabase>,
    pub buckets: Vec<AwsBucket>,
    pub vpcs: u64,
    pub file_systems: u64,
    /// Answer the file system count with an access-denied error.
    pub file_systems_denied: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OciFixture {
    pub compartments: Vec<OciCompartment>,
    /// compartment id → resources.
    pub instances: HashMap<String, Vec<OciInstance>>,
    pub volumes: HashMap<String, Vec<OciVolume>>,
    pub snapshots: HashMap<String, Vec<OciSnapshot>>,
    pub load_balancers: HashMap<String, Vec<OciLoadBalancer>>,
    pub buckets: HashMap<String, Vec<OciBucket>>,
    pub db_systems: HashMap<String, Vec<OciDbSystem>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HetznerFixture {
    pub servers: Vec<HetznerServer>,
    pub volumes: Vec<HetznerVolume>,
    pub primary_ips: Vec<HetznerPrimaryIp>,
}

impl FixtureCloud {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse fixture {}", path.display()))
    }

    pub fn with_account(mut self, name: impl Into<String>, account: FixtureAccount) -> Self {
        self.accounts.insert(name.into(), account);
        self
    }

    fn session(&self, profile: &Profile) -> Result<Arc<FixtureSession>, SdkError> {
        let account = self
            .accounts
            .get(&profile.name)
            .ok_or_else(|| SdkError::Auth(format!("unknown account {}", profile.name)))?;
        if let Some(msg) = &account.fail_session {
            return Err(SdkError::Auth(msg.clone()));
        }
        Ok(Arc::new(FixtureSession {
            account: account.clone(),
        }))
    }
}

impl FixtureAccount {
    pub fn with_series(mut self, resource_id: &str, metric: MetricKind, values: &[f64]) -> Self {
        self.series
            .entry(resource_id.to_string())
            .or_default()
            .insert(metric, values.to_vec());
        self
    }
}

struct FixtureSession {
    account: FixtureAccount,
}

impl FixtureSession {
    fn check_listing(&self, name: &str) -> Result<(), SdkError> {
        if self.account.failing_listings.iter().any(|l| l == name) {
            return Err(SdkError::api("503", format!("listing {name} unavailable")));
        }
        Ok(())
    }

    fn listing<T: Clone>(&self, name: &str, items: &[T]) -> Result<Vec<T>, SdkError> {
        self.check_listing(name)?;
        Ok(items.to_vec())
    }

    fn keyed<T: Clone>(&self, name: &str, map: &HashMap<String, Vec<T>>, key: &str) -> Result<Vec<T>, SdkError> {
        self.listing(name, map.get(key).map_or(&[][..], Vec::as_slice))
    }

    fn has_series(&self, resource_id: &str, metric: MetricKind) -> bool {
        self.account
            .series
            .get(resource_id)
            .is_some_and(|m| m.contains_key(&metric))
    }

    fn series(&self, resource_id: &str, query: MetricQuery, window: TimeWindow) -> Result<MetricSeries, SdkError> {
        if self.account.failing_metrics.iter().any(|r| r == resource_id) {
            return Err(SdkError::api("429", format!("metric query for {resource_id} throttled")));
        }
        let values = self
            .account
            .series
            .get(resource_id)
            .and_then(|m| m.get(&query.metric))
            .map_or(&[][..], Vec::as_slice);
        let n = values.len() as i64;
        let points = values.iter().enumerate().map(|(i, v)| {
            let back = (n - i as i64) * query.bucket_secs;
            MetricPoint::new(window.end - Duration::seconds(back), *v)
        });
        Ok(MetricSeries::align(
            query.metric,
            points,
            window,
            query.bucket_secs,
            query.aggregation,
        ))
    }
}

// ─── GCP ──────────────────────────────────────────────────────────────────────

#[async_trait]
impl GcpSdk for FixtureCloud {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn GcpSession>, SdkError> {
        let session: Arc<dyn GcpSession> = self.session(profile)?;
        Ok(session)
    }
}

#[async_trait]
impl GcpSession for FixtureSession {
    async fn list_projects(&self) -> Result<Vec<GcpProject>, SdkError> {
        self.listing("projects", &self.account.gcp.projects)
    }

    async fn list_instances(&self, project: &str) -> Result<Vec<GcpInstance>, SdkError> {
        self.keyed("instances", &self.account.gcp.instances, project)
    }

    async fn get_disk(&self, project: &str, zone: &str, name: &str) -> Result<GcpDisk, SdkError> {
        if self.account.failing_listings.iter().any(|l| l == "disks") {
            return Err(SdkError::api("503", "disk lookup unavailable"));
        }
        self.account
            .gcp
            .disks
            .get(project)
            .and_then(|disks| disks.iter().find(|d| d.name == name && d.zone == zone))
            .cloned()
            .ok_or_else(|| SdkError::NotFound(format!("disk {project}/{zone}/{name}")))
    }

    async fn query_series(
        &self,
        _project: &str,
        resource_id: &str,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<MetricSeries, SdkError> {
        self.series(resource_id, query, window)
    }
}

// ─── AWS ──────────────────────────────────────────────────────────────────────

#[async_trait]
impl AwsSdk for FixtureCloud {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn AwsSession>, SdkError> {
        let session: Arc<dyn AwsSession> = self.session(profile)?;
        Ok(session)
    }
}

#[async_trait]
impl AwsSession for FixtureSession {
    async fn list_instances(&self) -> Result<Vec<AwsInstance>, SdkError> {
        self.listing("instances", &self.account.aws.instances)
    }

    async fn list_volumes(&self) -> Result<Vec<AwsVolume>, SdkError> {
        self.listing("volumes", &self.account.aws.volumes)
    }

    async fn list_load_balancers(&self) -> Result<Vec<AwsLoadBalancer>, SdkError> {
        self.listing("load_balancers", &self.account.aws.load_balancers)
    }

    async fn list_addresses(&self) -> Result<Vec<AwsAddress>, SdkError> {
        self.listing("addresses", &self.account.aws.addresses)
    }

    async fn list_databases(&self) -> Result<Vec<AwsDatabase>, SdkError> {
        self.listing("databases", &self.account.aws.databases)
    }

    async fn list_buckets(&self) -> Result<Vec<AwsBucket>, SdkError> {
        self.listing("buckets", &self.account.aws.buckets)
    }

    async fn count_vpcs(&self) -> Result<u64, SdkError> {
        self.check_listing("vpcs")?;
        Ok(self.account.aws.vpcs)
    }

    async fn count_file_systems(&self) -> Result<u64, SdkError> {
        if self.account.aws.file_systems_denied {
            return Err(SdkError::api("AccessDeniedException", "elasticfilesystem:DescribeFileSystems"));
        }
        self.check_listing("file_systems")?;
        Ok(self.account.aws.file_systems)
    }

    async fn get_metric_statistics(
        &self,
        _target: MetricTarget,
        resource_id: &str,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<MetricSeries, SdkError> {
        self.series(resource_id, query, window)
    }
}

// ─── OCI ──────────────────────────────────────────────────────────────────────

#[async_trait]
impl OciSdk for FixtureCloud {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn OciSession>, SdkError> {
        let session: Arc<dyn OciSession> = self.session(profile)?;
        Ok(session)
    }
}

#[async_trait]
impl OciSession for FixtureSession {
    async fn list_compartments(&self) -> Result<Vec<OciCompartment>, SdkError> {
        self.listing("compartments", &self.account.oci.compartments)
    }

    async fn list_instances(&self, compartment: &str) -> Result<Vec<OciInstance>, SdkError> {
        self.keyed("instances", &self.account.oci.instances, compartment)
    }

    async fn list_volumes(&self, compartment: &str) -> Result<Vec<OciVolume>, SdkError> {
        self.keyed("volumes", &self.account.oci.volumes, compartment)
    }

    async fn list_snapshots(&self, compartment: &str) -> Result<Vec<OciSnapshot>, SdkError> {
        self.keyed("snapshots", &self.account.oci.snapshots, compartment)
    }

    async fn list_load_balancers(&self, compartment: &str) -> Result<Vec<OciLoadBalancer>, SdkError> {
        self.keyed("load_balancers", &self.account.oci.load_balancers, compartment)
    }

    async fn list_buckets(&self, compartment: &str) -> Result<Vec<OciBucket>, SdkError> {
        self.keyed("buckets", &self.account.oci.buckets, compartment)
    }

    async fn list_db_systems(&self, compartment: &str) -> Result<Vec<OciDbSystem>, SdkError> {
        self.keyed("db_systems", &self.account.oci.db_systems, compartment)
    }

    async fn summarize_metrics(
        &self,
        compartment: &str,
        namespace: OciNamespace,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<Vec<ResourceSeries>, SdkError> {
        if self.account.failing_metrics.iter().any(|r| r == compartment) {
            return Err(SdkError::api("429", format!("metric query for {compartment} throttled")));
        }
        let oci = &self.account.oci;
        let ids: Vec<&str> = match namespace {
            OciNamespace::ComputeAgent => ids_in(&oci.instances, compartment, |i| &i.id),
            OciNamespace::BlockStore => ids_in(&oci.volumes, compartment, |v| &v.id),
            OciNamespace::Database => ids_in(&oci.db_systems, compartment, |d| &d.id),
        };
        let mut found = Vec::new();
        for id in ids.into_iter().filter(|id| self.has_series(id, query.metric)) {
            found.push(ResourceSeries {
                resource_id: id.to_string(),
                series: self.series(id, query, window)?,
            });
        }
        Ok(found)
    }
}

fn ids_in<'a, T>(
    map: &'a HashMap<String, Vec<T>>,
    compartment: &str,
    id: impl Fn(&'a T) -> &'a String,
) -> Vec<&'a str> {
    map.get(compartment)
        .map_or(&[][..], Vec::as_slice)
        .iter()
        .map(|item| id(item).as_str())
        .collect()
}

// ─── Hetzner ──────────────────────────────────────────────────────────────────

#[async_trait]
impl HetznerSdk for FixtureCloud {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn HetznerSession>, SdkError> {
        let session: Arc<dyn HetznerSession> = self.session(profile)?;
        Ok(session)
    }
}

#[async_trait]
impl HetznerSession for FixtureSession {
    async fn list_servers(&self) -> Result<Vec<HetznerServer>, SdkError> {
        self.listing("servers", &self.account.hetzner.servers)
    }

    async fn list_volumes(&self) -> Result<Vec<HetznerVolume>, SdkError> {
        self.listing("volumes", &self.account.hetzner.volumes)
    }

    async fn list_primary_ips(&self) -> Result<Vec<HetznerPrimaryIp>, SdkError> {
        self.listing("primary_ips", &self.account.hetzner.primary_ips)
    }

    async fn server_cpu(
        &self,
        server: &HetznerServer,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<MetricSeries, SdkError> {
        self.series(&server.id.to_string(), query, window)
    }
}
