//! One generation run: number it, collect, write.
//!
//! Recommendations, errors and inventories are written as three independent
//! batches; a failed batch does not stop the others.

use crate::Collector;
use crate::run::{Limits, RunContext};
use cirrus_persist::{PersistError, PersistenceGateway};
use cirrus_proto::{ErrorCategory, Generation, Provider};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub limits: Limits,
    /// Parent token; cancelling it stops the run's in-flight calls.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub provider: Provider,
    pub generation: Generation,
    pub run_id: Uuid,
    pub profiles: usize,
    pub recommendations: usize,
    pub errors: usize,
    pub inventories: usize,
    pub recommendations_written: bool,
    pub errors_written: bool,
    pub inventories_written: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn fully_written(&self) -> bool {
        self.recommendations_written && self.errors_written && self.inventories_written
    }
}

/// Failures that prevent a run from starting. Everything after the
/// generation is fixed is reported through the summary instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot read last generation for {provider}: {source}")]
    Generation {
        provider: Provider,
        #[source]
        source: PersistError,
    },

    #[error("cannot read profiles for {provider}: {source}")]
    Profiles {
        provider: Provider,
        #[source]
        source: PersistError,
    },
}

pub async fn run_generation(
    gateway: &dyn PersistenceGateway,
    collector: &dyn Collector,
    options: RunOptions,
) -> Result<RunSummary, RunError> {
    let provider = collector.provider();
    let started = Instant::now();

    let generation = gateway
        .last_generation(provider)
        .await
        .map_err(|source| RunError::Generation { provider, source })?
        .next();
    let profiles = gateway
        .list_profiles(provider, true)
        .await
        .map_err(|source| RunError::Profiles { provider, source })?;
    let profile_count = profiles.len();

    let cancel = options.cancel.child_token();
    let (ctx, mut drain) = RunContext::new(provider, generation, options.limits, cancel.clone());
    info!(
        %provider,
        %generation,
        run_id = %ctx.run_id,
        profiles = profile_count,
        "collection run started"
    );

    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog = options.limits.run_timeout.map(|limit| {
        let cancel = cancel.clone();
        let timed_out = timed_out.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!(%provider, ?limit, "run timeout reached, cancelling in-flight calls");
            timed_out.store(true, Ordering::SeqCst);
            cancel.cancel();
        })
    });

    let recommendations = collector.collect(profiles, &ctx).await;

    if let Some(w) = watchdog {
        w.abort();
    }
    let cancelled = cancel.is_cancelled();
    if cancelled {
        let message = if timed_out.load(Ordering::SeqCst) {
            "run timeout reached before collection finished"
        } else {
            "run cancelled before collection finished"
        };
        ctx.errors()
            .record(None, ErrorCategory::Cancelled, None, message);
    }

    let errors = drain.drain();
    let inventories = drain.drain_inventories();
    let rec_count = recommendations.len();
    let err_count = errors.len();
    let inv_count = inventories.len();

    let recommendations_written = match gateway.add_recommendations(provider, recommendations).await {
        Ok(()) => true,
        Err(e) => {
            error!(%provider, %generation, count = rec_count, error = %e, "recommendation batch write failed");
            false
        }
    };
    let errors_written = match gateway.add_recommendation_errors(provider, errors).await {
        Ok(()) => true,
        Err(e) => {
            error!(%provider, %generation, count = err_count, error = %e, "error batch write failed");
            false
        }
    };

    let inventories_written = match gateway.add_inventories(provider, inventories).await {
        Ok(()) => true,
        Err(e) => {
            error!(%provider, %generation, count = inv_count, error = %e, "inventory batch write failed");
            false
        }
    };

    let summary = RunSummary {
        provider,
        generation,
        run_id: ctx.run_id,
        profiles: profile_count,
        recommendations: rec_count,
        errors: err_count,
        inventories: inv_count,
        recommendations_written,
        errors_written,
        inventories_written,
        cancelled,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    info!(
        %provider,
        %generation,
        recommendations = rec_count,
        errors = err_count,
        cancelled,
        duration_ms = summary.duration_ms,
        "collection run finished"
    );
    Ok(summary)
}
