//! Scheduled job bodies: one generation job per provider, plus retention.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use cirrus_collect::{Collector, Limits, RunOptions, RunSummary, run_generation};
use cirrus_persist::PersistenceGateway;
use cirrus_proto::Provider;
use cirrus_sched::ScheduledJob;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ─── Generation ───────────────────────────────────────────────────────────────

pub struct GenerationJob {
    name: String,
    gateway: Arc<dyn PersistenceGateway>,
    collector: Arc<dyn Collector>,
    limits: Limits,
    /// Daemon-wide token; each run takes a child of it.
    shutdown: CancellationToken,
}

impl GenerationJob {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        collector: Arc<dyn Collector>,
        limits: Limits,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name: format!("{}-generation", collector.provider()),
            gateway,
            collector,
            limits,
            shutdown,
        }
    }

    pub async fn run_once(&self) -> anyhow::Result<RunSummary> {
        let options = RunOptions {
            limits: self.limits,
            cancel: self.shutdown.child_token(),
        };
        let summary = run_generation(self.gateway.as_ref(), self.collector.as_ref(), options)
            .await
            .with_context(|| format!("{} generation run did not start", self.collector.provider()))?;
        Ok(summary)
    }
}

#[async_trait]
impl ScheduledJob for GenerationJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        let summary = self.run_once().await?;
        if !summary.fully_written() {
            anyhow::bail!(
                "generation {} for {} was only partially written",
                summary.generation,
                summary.provider
            );
        }
        Ok(())
    }
}

// ─── Retention ────────────────────────────────────────────────────────────────

pub struct RetentionJob {
    gateway: Arc<dyn PersistenceGateway>,
    providers: Vec<Provider>,
    keep_days: u32,
}

impl RetentionJob {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, providers: Vec<Provider>, keep_days: u32) -> Self {
        Self {
            gateway,
            providers,
            keep_days,
        }
    }
}

#[async_trait]
impl ScheduledJob for RetentionJob {
    fn name(&self) -> &str {
        "retention"
    }

    /// Every provider is attempted; the first failure is returned afterwards.
    async fn run(&self) -> anyhow::Result<()> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.keep_days));
        let mut first_err = None;
        for &provider in &self.providers {
            match self.gateway.delete_older_than(provider, cutoff).await {
                Ok(report) => info!(
                    %provider,
                    recommendations = report.recommendations,
                    errors = report.errors,
                    inventories = report.inventories,
                    %cutoff,
                    "retention pass complete"
                ),
                Err(e) => {
                    warn!(%provider, error = %e, "retention pass failed");
                    if first_err.is_none() {
                        first_err = Some(anyhow::Error::new(e).context(format!("retention for {provider}")));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
