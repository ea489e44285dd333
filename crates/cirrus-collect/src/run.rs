//! Per-run context shared by every task of one collection run.

use crate::error::{CollectError, SdkError};
use chrono::{DateTime, Utc};
use cirrus_metrics::TimeWindow;
use cirrus_proto::{
    ErrorCategory, Generation, ObjectCount, ProfileId, Provider, RecommendationError,
    ResourceInventory,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

// ─── Limits ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Tasks per fan-out layer.
    pub max_concurrency: usize,
    /// Deadline for a single SDK call.
    pub call_timeout: Duration,
    /// Deadline for the whole run; `None` disables it.
    pub run_timeout: Option<Duration>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            call_timeout: Duration::from_secs(60),
            run_timeout: Some(Duration::from_secs(2 * 60 * 60)),
        }
    }
}

// ─── Error Collector ──────────────────────────────────────────────────────────

/// Sending half used by producers; records are tagged with the run's
/// generation and start time at creation.
#[derive(Debug, Clone)]
pub struct ErrorCollector {
    provider: Provider,
    generation: Generation,
    created_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<RecommendationError>,
}

/// Receiving half owned by the run coordinator.
#[derive(Debug)]
pub struct RunDrain {
    rx: mpsc::UnboundedReceiver<RecommendationError>,
    inventories: Option<mpsc::UnboundedReceiver<ResourceInventory>>,
}

impl ErrorCollector {
    pub fn channel(
        provider: Provider,
        generation: Generation,
        created_at: DateTime<Utc>,
    ) -> (Self, RunDrain) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                provider,
                generation,
                created_at,
                tx,
            },
            RunDrain {
                rx,
                inventories: None,
            },
        )
    }

    pub fn record(
        &self,
        profile: Option<ProfileId>,
        category: ErrorCategory,
        resource: Option<&str>,
        message: impl Into<String>,
    ) {
        let mut err =
            RecommendationError::new(self.provider, self.generation, profile, category, message);
        err.resource_id = resource.map(str::to_string);
        err.created_at = self.created_at;
        // Drain outlives every producer of a run; a send failure means the
        // run already finished.
        let _ = self.tx.send(err);
    }

    /// Log and record a failed step. Cancellation is recorded once per run by
    /// the coordinator, not per step.
    pub fn report(
        &self,
        profile: Option<ProfileId>,
        category: ErrorCategory,
        resource: Option<&str>,
        err: &CollectError,
    ) {
        if err.is_cancelled() {
            debug!(provider = %self.provider, ?profile, ?resource, "step cancelled");
            return;
        }
        warn!(
            provider = %self.provider,
            generation = %self.generation,
            ?profile,
            resource = resource.unwrap_or("-"),
            %category,
            error = %err,
            "collection step failed"
        );
        self.record(profile, category, resource, err.to_string());
    }
}

impl RunDrain {
    /// Everything sent so far. Call after the fan-out has finished.
    pub fn drain(&mut self) -> Vec<RecommendationError> {
        let mut out = Vec::new();
        while let Ok(err) = self.rx.try_recv() {
            out.push(err);
        }
        out
    }

    /// Inventories recorded through the run's context so far.
    pub fn drain_inventories(&mut self) -> Vec<ResourceInventory> {
        let mut out = Vec::new();
        if let Some(rx) = self.inventories.as_mut() {
            while let Ok(inventory) = rx.try_recv() {
                out.push(inventory);
            }
        }
        out
    }
}

// ─── Run Context ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunContext {
    pub provider: Provider,
    pub generation: Generation,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub limits: Limits,
    cancel: CancellationToken,
    errors: ErrorCollector,
    inventories: mpsc::UnboundedSender<ResourceInventory>,
}

impl RunContext {
    pub fn new(
        provider: Provider,
        generation: Generation,
        limits: Limits,
        cancel: CancellationToken,
    ) -> (Self, RunDrain) {
        let started_at = Utc::now();
        let (errors, mut drain) = ErrorCollector::channel(provider, generation, started_at);
        let (inventories, inventory_rx) = mpsc::unbounded_channel();
        drain.inventories = Some(inventory_rx);
        let ctx = Self {
            provider,
            generation,
            run_id: Uuid::new_v4(),
            started_at,
            limits,
            cancel,
            errors,
            inventories,
        };
        (ctx, drain)
    }

    pub fn errors(&self) -> &ErrorCollector {
        &self.errors
    }

    /// Record the resource counts of one profile under the run's generation.
    pub fn record_inventory(&self, profile: ProfileId, profile_name: &str, counts: Vec<ObjectCount>) {
        let inventory = ResourceInventory {
            id: Uuid::new_v4(),
            generation: self.generation,
            provider: self.provider,
            profile_id: profile,
            profile_name: profile_name.to_string(),
            counts,
            created_at: self.started_at,
        };
        let _ = self.inventories.send(inventory);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Trailing window of whole days ending at the run's start date.
    pub fn window(&self, days: u32) -> TimeWindow {
        TimeWindow::trailing_days(self.started_at, days)
    }

    /// Run one SDK call under the run's cancellation token and the per-call
    /// timeout.
    pub async fn call<T, F>(&self, call: F) -> Result<T, CollectError>
    where
        F: Future<Output = Result<T, SdkError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }
        let timeout = self.limits.call_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CollectError::Cancelled),
            out = tokio::time::timeout(timeout, call) => match out {
                Ok(result) => result.map_err(CollectError::from),
                Err(_) => Err(CollectError::Timeout(timeout)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(limits: Limits) -> (RunContext, RunDrain) {
        RunContext::new(
            Provider::Gcp,
            Generation(4),
            limits,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_call_passes_result_through() {
        let (ctx, _drain) = ctx_with(Limits::default());
        let ok = ctx.call(async { Ok::<_, SdkError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err = ctx
            .call(async { Err::<u32, _>(SdkError::Auth("bad key".to_string())) })
            .await;
        assert!(matches!(err, Err(CollectError::Sdk(SdkError::Auth(_)))));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let (ctx, _drain) = ctx_with(Limits {
            call_timeout: Duration::from_millis(20),
            ..Limits::default()
        });
        let out = ctx
            .call(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, SdkError>(())
            })
            .await;
        assert_eq!(out, Err(CollectError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_call_stops_on_cancel() {
        let (ctx, _drain) = ctx_with(Limits::default());
        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let out = ctx
            .call(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, SdkError>(())
            })
            .await;
        assert_eq!(out, Err(CollectError::Cancelled));
        assert!(ctx.is_cancelled());

        let again = ctx.call(async { Ok::<_, SdkError>(1) }).await;
        assert_eq!(again, Err(CollectError::Cancelled));
    }

    #[tokio::test]
    async fn test_errors_share_generation_and_skip_cancellation() {
        let (ctx, mut drain) = ctx_with(Limits::default());
        let profile = ProfileId::new();
        let producer = ctx.clone();
        tokio::spawn(async move {
            producer.errors().report(
                Some(profile),
                ErrorCategory::Listing,
                Some("proj-a"),
                &CollectError::Sdk(SdkError::api("403", "forbidden")),
            );
            producer
                .errors()
                .report(Some(profile), ErrorCategory::MetricQuery, None, &CollectError::Cancelled);
        })
        .await
        .expect("producer task");

        let errors = drain.drain();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].generation, Generation(4));
        assert_eq!(errors[0].provider, Provider::Gcp);
        assert_eq!(errors[0].resource_id.as_deref(), Some("proj-a"));
        assert_eq!(errors[0].created_at, ctx.started_at);
        assert!(errors[0].message.contains("forbidden"));
        assert!(drain.drain().is_empty());
    }

    #[tokio::test]
    async fn test_inventories_are_tagged_with_run() {
        let (ctx, mut drain) = ctx_with(Limits::default());
        let profile = ProfileId::new();
        ctx.record_inventory(profile, "prod", vec![ObjectCount::new("Buckets", 2)]);

        let inventories = drain.drain_inventories();
        assert_eq!(inventories.len(), 1);
        assert_eq!(inventories[0].generation, Generation(4));
        assert_eq!(inventories[0].profile_id, profile);
        assert_eq!(inventories[0].created_at, ctx.started_at);
        assert!(drain.drain().is_empty());
        assert!(drain.drain_inventories().is_empty());
    }

    #[test]
    fn test_window_uses_run_start() {
        let (ctx, _drain) = ctx_with(Limits::default());
        let window = ctx.window(7);
        assert_eq!(window.duration(), chrono::Duration::days(7));
        assert!(window.end <= ctx.started_at);
    }
}
