//! cirrusd: scheduled multi-cloud utilization audits.
//!
//! Wires the JSON state store, one collector per configured provider and the
//! retention pass into the cron scheduler.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod jobs;

use cirrus_collect::providers::aws::AwsCollector;
use cirrus_collect::providers::gcp::GcpCollector;
use cirrus_collect::providers::hetzner::{HetznerApi, HetznerCollector};
use cirrus_collect::providers::oci::OciCollector;
use cirrus_collect::{Collector, FixtureCloud};
use cirrus_persist::{JsonGateway, PersistenceGateway};
use cirrus_proto::Provider;
use cirrus_sched::{JobSpec, ScheduledJob, Scheduler};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::{DaemonConfig, ProviderJob, RetentionConfig};
pub use error::{DaemonError, DaemonResult};
pub use jobs::{GenerationJob, RetentionJob};

// ─── Backends ─────────────────────────────────────────────────────────────────

pub fn open_gateway(config: &DaemonConfig) -> DaemonResult<Arc<JsonGateway>> {
    std::fs::create_dir_all(&config.state_path)?;
    Ok(Arc::new(JsonGateway::open(&config.state_path)?))
}

pub fn load_fixture(config: &DaemonConfig) -> DaemonResult<Option<Arc<FixtureCloud>>> {
    let Some(path) = &config.fixture_path else {
        return Ok(None);
    };
    let fixture = FixtureCloud::load(path).map_err(|e| DaemonError::Config(format!("{e:#}")))?;
    info!(path = %path.display(), accounts = fixture.accounts.len(), "loaded fixture cloud");
    Ok(Some(Arc::new(fixture)))
}

/// Collector for one provider. A fixture, when configured, backs every
/// provider; otherwise only Hetzner has a live API client.
pub fn build_collector(
    config: &DaemonConfig,
    fixture: Option<&Arc<FixtureCloud>>,
    provider: Provider,
) -> DaemonResult<Arc<dyn Collector>> {
    let policy = &config.policy;
    let collector: Arc<dyn Collector> = match (provider, fixture) {
        (Provider::Gcp, Some(f)) => Arc::new(GcpCollector::new(f.clone(), policy.gcp.clone())),
        (Provider::Aws, Some(f)) => Arc::new(AwsCollector::new(f.clone(), policy.aws.clone())),
        (Provider::Oci, Some(f)) => Arc::new(OciCollector::new(f.clone(), policy.oci.clone())),
        (Provider::Hetzner, Some(f)) => {
            Arc::new(HetznerCollector::new(f.clone(), policy.hetzner.clone()))
        }
        (Provider::Hetzner, None) => {
            let api = HetznerApi::new(config.hetzner_api_url.as_str())
                .map_err(|e| DaemonError::Collector(format!("hetzner: {e}")))?;
            Arc::new(HetznerCollector::new(Arc::new(api), policy.hetzner.clone()))
        }
        (other, None) => {
            return Err(DaemonError::Collector(format!(
                "no {other} API binding available; set fixture_path to collect from a fixture"
            )));
        }
    };
    Ok(collector)
}

// ─── Job wiring ───────────────────────────────────────────────────────────────

/// Register one generation job per enabled provider plus retention. A
/// provider whose collector cannot be built is logged and left out.
/// Returns the number of jobs registered.
pub async fn register_jobs(
    scheduler: &mut Scheduler,
    config: &DaemonConfig,
    gateway: Arc<dyn PersistenceGateway>,
    fixture: Option<&Arc<FixtureCloud>>,
    shutdown: &CancellationToken,
) -> usize {
    let mut registered = 0;
    let mut providers = Vec::new();
    for job in config.enabled_providers() {
        providers.push(job.provider);
        let collector = match build_collector(config, fixture, job.provider) {
            Ok(c) => c,
            Err(e) => {
                warn!(provider = %job.provider, error = %e, "provider job skipped");
                continue;
            }
        };
        let generation = GenerationJob::new(gateway.clone(), collector, job.limits(), shutdown.clone());
        let spec = JobSpec::new(generation.name(), &job.cron)
            .at_startup(job.run_at_startup);
        if scheduler.register(&spec, Arc::new(generation)).await {
            registered += 1;
        }
    }

    if config.retention.enabled && !providers.is_empty() {
        let retention = RetentionJob::new(gateway, providers, config.retention.keep_days);
        let spec = JobSpec::new("retention", &config.retention.cron);
        if scheduler.register(&spec, Arc::new(retention)).await {
            registered += 1;
        }
    }
    registered
}
