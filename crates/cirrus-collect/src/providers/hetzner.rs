//! Hetzner Cloud: profiles → {servers, volumes, primary IPs}.
//!
//! [`HetznerApi`] talks to the public REST API with a bearer token from the
//! profile credentials. Server CPU metrics are reported by Hetzner as percent
//! of one core, so they are divided by the core count before auditing.

use crate::Collector;
use crate::auditor::audit_resource;
use crate::builder::{Finding, RecommendationBuilder};
use crate::error::SdkError;
use crate::fanout::{collect_flat, parallel_map};
use crate::policy::{HetznerPolicy, MetricQuery};
use crate::providers::{Scope, compute_recommendation};
use crate::run::RunContext;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use cirrus_metrics::{MetricPoint, MetricSeries, Scale, TimeWindow};
use cirrus_proto::{Credentials, Detail, ErrorCategory, Profile, Provider, Recommendation};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://api.hetzner.cloud/v1";
const PER_PAGE: u32 = 50;

// ─── API types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HetznerServer {
    pub id: u64,
    pub name: String,
    /// `running`, `off`, ...
    pub status: String,
    pub server_type: HetznerServerType,
    #[serde(default)]
    pub datacenter: Option<HetznerDatacenter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HetznerServerType {
    pub name: String,
    pub cores: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HetznerDatacenter {
    pub name: String,
    pub location: HetznerLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HetznerLocation {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HetznerVolume {
    pub id: u64,
    pub name: String,
    /// GB.
    pub size: u64,
    /// Attached server id; `None` when detached.
    #[serde(default)]
    pub server: Option<u64>,
    pub location: HetznerLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HetznerPrimaryIp {
    pub id: u64,
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub assignee_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsResponse {
    pub metrics: MetricsBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsBody {
    pub time_series: HashMap<String, TimeSeries>,
}

/// `[[unix_seconds, "value"], ...]`
#[derive(Debug, Clone, Deserialize)]
pub struct TimeSeries {
    pub values: Vec<(f64, String)>,
}

/// Turn a `type=cpu` metrics response into a series in percent of the
/// server's total capacity, aligned to the query's buckets.
pub fn parse_cpu_series(
    body: &MetricsResponse,
    cores: u32,
    query: MetricQuery,
    window: TimeWindow,
) -> Result<MetricSeries, SdkError> {
    let cores = f64::from(cores.max(1));
    let mut raw = Vec::new();
    if let Some(series) = body.metrics.time_series.get("cpu") {
        for (ts, value) in &series.values {
            let value: f64 = value
                .parse()
                .map_err(|_| SdkError::Decode(format!("cpu sample {value:?} is not a number")))?;
            let secs = ts.trunc() as i64;
            let nanos = (ts.fract() * 1e9) as u32;
            let Some(timestamp) = DateTime::from_timestamp(secs, nanos) else {
                return Err(SdkError::Decode(format!("timestamp {ts} out of range")));
            };
            raw.push(MetricPoint::new(timestamp, value / cores));
        }
    }
    Ok(MetricSeries::align(
        query.metric,
        raw,
        window,
        query.bucket_secs,
        query.aggregation,
    ))
}

// ─── SDK boundary ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait HetznerSdk: Send + Sync {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn HetznerSession>, SdkError>;
}

#[async_trait]
pub trait HetznerSession: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<HetznerServer>, SdkError>;
    async fn list_volumes(&self) -> Result<Vec<HetznerVolume>, SdkError>;
    async fn list_primary_ips(&self) -> Result<Vec<HetznerPrimaryIp>, SdkError>;

    /// CPU usage in percent of the whole server.
    async fn server_cpu(
        &self,
        server: &HetznerServer,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<MetricSeries, SdkError>;
}

// ─── REST client ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HetznerApi {
    base_url: String,
    client: reqwest::Client,
}

impl HetznerApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SdkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SdkError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl HetznerSdk for HetznerApi {
    async fn new_session(&self, profile: &Profile) -> Result<Arc<dyn HetznerSession>, SdkError> {
        let Credentials::Hetzner { api_token } = &profile.credentials else {
            return Err(SdkError::Auth(format!(
                "profile {} does not carry hetzner credentials",
                profile.name
            )));
        };
        let session = HetznerClient {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            token: api_token.clone(),
        };
        // A token the API rejects fails here, once per profile.
        let _: serde_json::Value = session.get_json("/locations", &[]).await?;
        Ok(Arc::new(session))
    }
}

struct HetznerClient {
    base_url: String,
    client: reqwest::Client,
    token: String,
}

impl HetznerClient {
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SdkError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| SdkError::Transport(format!("GET {path}: {e}")))?;

        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SdkError::Auth(format!("GET {path} returned {status}")));
            }
            StatusCode::NOT_FOUND => return Err(SdkError::NotFound(path.to_string())),
            s if !s.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                return Err(SdkError::api(status.as_str(), body));
            }
            _ => {}
        }
        resp.json::<T>()
            .await
            .map_err(|e| SdkError::Decode(format!("GET {path}: {e}")))
    }

    /// Follow `meta.pagination.next_page` until the last page.
    async fn list_all<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<Vec<T>, SdkError> {
        let mut out = Vec::new();
        let mut page = 1u64;
        loop {
            let body: serde_json::Value = self
                .get_json(path, &[("page", page.to_string()), ("per_page", PER_PAGE.to_string())])
                .await?;
            let items = body
                .get(key)
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
            let items: Vec<T> = serde_json::from_value(items)
                .map_err(|e| SdkError::Decode(format!("GET {path} {key}: {e}")))?;
            out.extend(items);

            match body
                .pointer("/meta/pagination/next_page")
                .and_then(serde_json::Value::as_u64)
            {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        debug!(path, count = out.len(), "hetzner listing complete");
        Ok(out)
    }
}

#[async_trait]
impl HetznerSession for HetznerClient {
    async fn list_servers(&self) -> Result<Vec<HetznerServer>, SdkError> {
        self.list_all("/servers", "servers").await
    }

    async fn list_volumes(&self) -> Result<Vec<HetznerVolume>, SdkError> {
        self.list_all("/volumes", "volumes").await
    }

    async fn list_primary_ips(&self) -> Result<Vec<HetznerPrimaryIp>, SdkError> {
        self.list_all("/primary_ips", "primary_ips").await
    }

    async fn server_cpu(
        &self,
        server: &HetznerServer,
        query: MetricQuery,
        window: TimeWindow,
    ) -> Result<MetricSeries, SdkError> {
        let path = format!("/servers/{}/metrics", server.id);
        let body: MetricsResponse = self
            .get_json(
                &path,
                &[
                    ("type", "cpu".to_string()),
                    ("start", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("end", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("step", query.bucket_secs.to_string()),
                ],
            )
            .await?;
        parse_cpu_series(&body, server.server_type.cores, query, window)
    }
}

// ─── Collector ────────────────────────────────────────────────────────────────

pub struct HetznerCollector {
    sdk: Arc<dyn HetznerSdk>,
    policy: Arc<HetznerPolicy>,
}

impl HetznerCollector {
    pub fn new(sdk: Arc<dyn HetznerSdk>, policy: HetznerPolicy) -> Self {
        Self {
            sdk,
            policy: Arc::new(policy),
        }
    }
}

#[async_trait]
impl Collector for HetznerCollector {
    fn provider(&self) -> Provider {
        Provider::Hetzner
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
    session: Arc<dyn HetznerSession>,
    policy: Arc<HetznerPolicy>,
    scope: Scope,
}

impl ProfileTask {
    fn listing_failed(&self, kind: &str, err: &crate::CollectError) {
        self.ctx.errors().report(
            Some(self.scope.profile_id),
            ErrorCategory::Listing,
            Some(kind),
            err,
        );
    }
}

async fn collect_profile(
    ctx: RunContext,
    sdk: Arc<dyn HetznerSdk>,
    policy: Arc<HetznerPolicy>,
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
    info!(profile = %profile.name, "hetzner session established");

    let task = ProfileTask {
        ctx,
        session,
        policy,
        scope: Scope::new(profile.id, &profile.region),
    };
    let (mut out, volumes, ips) = tokio::join!(
        collect_servers(task.clone()),
        collect_volumes(&task),
        collect_primary_ips(&task),
    );
    out.extend(volumes);
    out.extend(ips);
    out
}

async fn collect_servers(task: ProfileTask) -> Vec<Recommendation> {
    let servers = match task.ctx.call(task.session.list_servers()).await {
        Ok(s) => s,
        Err(e) => {
            task.listing_failed("servers", &e);
            return Vec::new();
        }
    };
    let limit = task.ctx.limits.max_concurrency;
    let rx = parallel_map(servers, limit, move |server| {
        let task = task.clone();
        async move { audit_server(&task, &server).await.into_iter().collect::<Vec<_>>() }
    });
    collect_flat(rx).await
}

fn server_scope(task: &ProfileTask, server: &HetznerServer) -> Scope {
    match &server.datacenter {
        Some(dc) => {
            let mut scope = task.scope.with_zone(&dc.name);
            scope.placement.region = dc.location.name.clone();
            scope
        }
        None => task.scope.clone(),
    }
}

async fn audit_server(task: &ProfileTask, server: &HetznerServer) -> Option<Recommendation> {
    let scope = server_scope(task, server);
    let id = server.id.to_string();
    match server.status.as_str() {
        "off" => Some(
            RecommendationBuilder::new(&task.ctx, scope.profile_id, Finding::ComputeStopped)
                .resource(&id, &server.name)
                .placement(scope.placement)
                .detail("Server Type", &server.server_type.name)
                .detail("Status", &server.status)
                .build(),
        ),
        "running" => {
            let checks = &task.policy.server;
            let audit = audit_resource(
                &task.ctx,
                scope.profile_id,
                &id,
                checks,
                |_| Scale::Percent,
                |query, window| task.session.server_cpu(server, query, window),
            )
            .await;
            compute_recommendation(
                &task.ctx,
                &scope,
                (&id, &server.name),
                checks,
                &audit,
                server.server_type.cores >= task.policy.rightsizing_min_cores,
                vec![
                    Detail::new("Server Type", &server.server_type.name),
                    Detail::new("Cores", server.server_type.cores),
                ],
            )
        }
        _ => None,
    }
}

async fn collect_volumes(task: &ProfileTask) -> Vec<Recommendation> {
    match task.ctx.call(task.session.list_volumes()).await {
        Ok(volumes) => volumes
            .iter()
            .filter(|v| v.server.is_none())
            .map(|v| {
                let mut scope = task.scope.clone();
                scope.placement.region = v.location.name.clone();
                RecommendationBuilder::new(&task.ctx, scope.profile_id, Finding::StorageUnattached)
                    .resource(v.id.to_string(), &v.name)
                    .placement(scope.placement)
                    .detail("Size GB", v.size)
                    .build()
            })
            .collect(),
        Err(e) => {
            task.listing_failed("volumes", &e);
            Vec::new()
        }
    }
}

async fn collect_primary_ips(task: &ProfileTask) -> Vec<Recommendation> {
    match task.ctx.call(task.session.list_primary_ips()).await {
        Ok(ips) => ips
            .iter()
            .filter(|ip| ip.assignee_id.is_none())
            .map(|ip| {
                RecommendationBuilder::new(&task.ctx, task.scope.profile_id, Finding::AddressUnassociated)
                    .resource(ip.id.to_string(), &ip.name)
                    .placement(task.scope.placement.clone())
                    .detail("Public IP", &ip.ip)
                    .build()
            })
            .collect(),
        Err(e) => {
            task.listing_failed("primary_ips", &e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cirrus_metrics::{Aggregation, MetricKind};

    #[test]
    fn test_server_list_page_decodes() {
        let body = r#"{
            "servers": [{
                "id": 42,
                "name": "web-1",
                "status": "running",
                "server_type": {"name": "cx32", "cores": 4, "memory": 8.0},
                "datacenter": {"name": "fsn1-dc14", "location": {"name": "fsn1"}}
            }],
            "meta": {"pagination": {"page": 1, "per_page": 50, "next_page": null}}
        }"#;
        let value: serde_json::Value = serde_json::from_str(body).expect("json");
        let servers: Vec<HetznerServer> =
            serde_json::from_value(value["servers"].clone()).expect("servers");
        assert_eq!(servers[0].server_type.cores, 4);
        assert_eq!(
            servers[0].datacenter.as_ref().map(|d| d.location.name.as_str()),
            Some("fsn1")
        );
    }

    #[test]
    fn test_detached_volume_and_ip_decode() {
        let volume: HetznerVolume = serde_json::from_str(
            r#"{"id": 7, "name": "data", "size": 100, "server": null, "location": {"name": "nbg1"}}"#,
        )
        .expect("volume");
        assert!(volume.server.is_none());
        let ip: HetznerPrimaryIp =
            serde_json::from_str(r#"{"id": 9, "name": "ip-9", "ip": "203.0.113.9", "assignee_id": null}"#)
                .expect("ip");
        assert!(ip.assignee_id.is_none());
    }

    #[test]
    fn test_cpu_series_normalized_by_cores() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("date");
        let window = TimeWindow::new(start, start + chrono::Duration::days(2));
        let t0 = start.timestamp() as f64;
        let body: MetricsResponse = serde_json::from_value(serde_json::json!({
            "metrics": {
                "start": "2026-01-01T00:00:00Z",
                "end": "2026-01-03T00:00:00Z",
                "step": 86400,
                "time_series": {"cpu": {"values": [[t0, "200"], [t0 + 86400.0, "40.5"]]}}
            }
        }))
        .expect("metrics");
        let query = MetricQuery::new(MetricKind::AvgCpu, 2, 86_400, Aggregation::Mean);

        let series = parse_cpu_series(&body, 4, query, window).expect("series");
        let values: Vec<f64> = series.values().collect();
        assert_eq!(values, vec![50.0, 10.125]);
    }

    #[test]
    fn test_cpu_series_rejects_garbage() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("date");
        let window = TimeWindow::new(start, start + chrono::Duration::days(1));
        let body: MetricsResponse = serde_json::from_value(serde_json::json!({
            "metrics": {"time_series": {"cpu": {"values": [[start.timestamp() as f64, "n/a"]]}}}
        }))
        .expect("metrics");
        let query = MetricQuery::new(MetricKind::AvgCpu, 1, 86_400, Aggregation::Mean);
        assert!(matches!(
            parse_cpu_series(&body, 2, query, window),
            Err(SdkError::Decode(_))
        ));
    }
}
