//! Daemon configuration

use cirrus_collect::{AuditPolicy, Limits};
use cirrus_collect::providers::hetzner::DEFAULT_API_URL;
use cirrus_proto::Provider;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DaemonError, DaemonResult};

/// Configuration for the cirrus daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Root of the JSON state store (profiles, recommendations, errors)
    pub state_path: PathBuf,

    /// JSON file describing fixture accounts; backs every provider SDK when set
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,

    /// Hetzner Cloud API base URL
    #[serde(default = "default_hetzner_api_url")]
    pub hetzner_api_url: String,

    /// One collection job per provider
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderJob>,

    #[serde(default)]
    pub retention: RetentionConfig,

    /// Metric checks and thresholds per resource type
    #[serde(default)]
    pub policy: AuditPolicy,
}

/// Schedule and limits for one provider's generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderJob {
    pub provider: Provider,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Six-field cron expression (`sec min hour day month weekday`)
    pub cron: String,

    #[serde(default)]
    pub run_at_startup: bool,

    /// Concurrent tasks per fan-out layer
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for a single cloud API call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Deadline for a whole run; 0 disables it
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

/// Age-based cleanup of old generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub cron: String,
    /// Records created more than this many days ago are deleted
    pub keep_days: u32,
}

fn default_hetzner_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    8
}

fn default_call_timeout() -> u64 {
    60
}

fn default_run_timeout() -> u64 {
    2 * 60 * 60
}

fn default_providers() -> Vec<ProviderJob> {
    [
        (Provider::Aws, "0 0 1 * * *"),
        (Provider::Gcp, "0 0 2 * * *"),
        (Provider::Oci, "0 0 3 * * *"),
        (Provider::Hetzner, "0 0 4 * * *"),
    ]
    .into_iter()
    .map(|(provider, cron)| ProviderJob::new(provider, cron))
    .collect()
}

impl ProviderJob {
    pub fn new(provider: Provider, cron: impl Into<String>) -> Self {
        Self {
            provider,
            enabled: true,
            cron: cron.into(),
            run_at_startup: false,
            max_concurrency: default_max_concurrency(),
            call_timeout_secs: default_call_timeout(),
            run_timeout_secs: default_run_timeout(),
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_concurrency: self.max_concurrency.max(1),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            run_timeout: (self.run_timeout_secs > 0)
                .then(|| Duration::from_secs(self.run_timeout_secs)),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 30 0 * * *".to_string(),
            keep_days: 90,
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| DaemonError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> DaemonResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Each provider may appear at most once.
    pub fn validate(&self) -> DaemonResult<()> {
        for (i, job) in self.providers.iter().enumerate() {
            if self.providers[..i].iter().any(|p| p.provider == job.provider) {
                return Err(DaemonError::Config(format!(
                    "provider {} configured more than once",
                    job.provider
                )));
            }
        }
        Ok(())
    }

    pub fn provider(&self, provider: Provider) -> Option<&ProviderJob> {
        self.providers.iter().find(|p| p.provider == provider)
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderJob> {
        self.providers.iter().filter(|p| p.enabled)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("/var/lib/cirrus"),
            fixture_path: None,
            hetzner_api_url: default_hetzner_api_url(),
            providers: default_providers(),
            retention: RetentionConfig::default(),
            policy: AuditPolicy::default(),
        }
    }
}
