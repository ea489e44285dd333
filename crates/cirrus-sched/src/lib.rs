//! Cron scheduling for cirrus jobs.
//!
//! Each registered job gets its own cron entry and its own overlap guard:
//! a firing that arrives while the previous run of the same job is still
//! going is skipped. Different jobs share nothing and run concurrently.
//! A job that fails or panics is logged; its next firing still happens.

#![forbid(unsafe_code)]

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// Cron expressions carry a leading seconds field: `0 0 3 * * *` is 03:00
/// every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub cron: String,
    #[serde(default)]
    pub run_at_startup: bool,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            run_at_startup: false,
        }
    }

    pub fn at_startup(mut self, run_at_startup: bool) -> Self {
        self.run_at_startup = run_at_startup;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Completed,
    Failed,
    Panicked,
    /// The previous run of the same job had not finished.
    Skipped,
}

impl fmt::Display for FireOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Panicked => write!(f, "panicked"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

// ─── Runner ───────────────────────────────────────────────────────────────────

/// One job plus its overlap guard. Clones share the guard.
#[derive(Clone)]
pub struct JobRunner {
    job: Arc<dyn ScheduledJob>,
    guard: Arc<Mutex<()>>,
}

impl JobRunner {
    pub fn new(job: Arc<dyn ScheduledJob>) -> Self {
        Self {
            job,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    /// Run the job once unless a run is already in progress. The run happens
    /// on its own task so a panic stays contained.
    pub async fn fire(&self) -> FireOutcome {
        let Ok(running) = self.guard.clone().try_lock_owned() else {
            warn!(job = self.name(), "previous run still in progress, firing skipped");
            return FireOutcome::Skipped;
        };

        let job = self.job.clone();
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let _running = running;
            job.run().await
        });

        let outcome = match handle.await {
            Ok(Ok(())) => FireOutcome::Completed,
            Ok(Err(e)) => {
                error!(job = self.name(), error = %format!("{e:#}"), "job failed");
                FireOutcome::Failed
            }
            Err(e) if e.is_panic() => {
                error!(job = self.name(), error = %e, "job panicked");
                FireOutcome::Panicked
            }
            Err(e) => {
                error!(job = self.name(), error = %e, "job task aborted");
                FireOutcome::Failed
            }
        };
        info!(
            job = self.name(),
            %outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job firing finished"
        );
        outcome
    }
}

// ─── Scheduler ────────────────────────────────────────────────────────────────

pub struct Scheduler {
    inner: JobScheduler,
    registered: Vec<String>,
}

impl Scheduler {
    pub async fn new() -> anyhow::Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("failed to create job scheduler")?;
        Ok(Self {
            inner,
            registered: Vec::new(),
        })
    }

    /// Add a job under its cron expression. A bad expression is logged and
    /// the job skipped; other registrations are unaffected.
    pub async fn register(&mut self, spec: &JobSpec, job: Arc<dyn ScheduledJob>) -> bool {
        let runner = JobRunner::new(job);
        let cron_runner = runner.clone();
        let cron_job = match Job::new_async(spec.cron.as_str(), move |_id, _sched| {
            let runner = cron_runner.clone();
            Box::pin(async move {
                runner.fire().await;
            })
        }) {
            Ok(job) => job,
            Err(e) => {
                error!(job = %spec.name, cron = %spec.cron, error = %e, "invalid schedule, job not registered");
                return false;
            }
        };
        if let Err(e) = self.inner.add(cron_job).await {
            error!(job = %spec.name, error = %e, "failed to add job to scheduler");
            return false;
        }

        if spec.run_at_startup {
            tokio::spawn(async move {
                runner.fire().await;
            });
        }
        info!(job = %spec.name, cron = %spec.cron, run_at_startup = spec.run_at_startup, "job registered");
        self.registered.push(spec.name.clone());
        true
    }

    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.inner
            .start()
            .await
            .context("failed to start job scheduler")
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.inner
            .shutdown()
            .await
            .context("failed to stop job scheduler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledJob for SlowJob {
        fn name(&self) -> &str {
            "slow"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }

    struct PanicJob;

    #[async_trait]
    impl ScheduledJob for PanicJob {
        fn name(&self) -> &str {
            "panics"
        }

        async fn run(&self) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    struct FailJob;

    #[async_trait]
    impl ScheduledJob for FailJob {
        fn name(&self) -> &str {
            "fails"
        }

        async fn run(&self) -> anyhow::Result<()> {
            anyhow::bail!("gateway unreachable")
        }
    }

    #[tokio::test]
    async fn test_same_job_never_overlaps() {
        let job = Arc::new(SlowJob {
            runs: AtomicUsize::new(0),
        });
        let runner = JobRunner::new(job.clone());
        let (a, b) = tokio::join!(runner.fire(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            runner.fire().await
        });
        assert_eq!(a, FireOutcome::Completed);
        assert_eq!(b, FireOutcome::Skipped);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        assert_eq!(runner.fire().await, FireOutcome::Completed);
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_and_error_are_contained() {
        let panicking = JobRunner::new(Arc::new(PanicJob));
        assert_eq!(panicking.fire().await, FireOutcome::Panicked);
        // Guard released after the panic.
        assert_eq!(panicking.fire().await, FireOutcome::Panicked);

        let failing = JobRunner::new(Arc::new(FailJob));
        assert_eq!(failing.fire().await, FireOutcome::Failed);
    }

    #[tokio::test]
    async fn test_bad_cron_skips_only_that_job() {
        let mut scheduler = Scheduler::new().await.expect("scheduler");
        let bad = JobSpec::new("bad", "every tuesday-ish");
        let good = JobSpec::new("good", "0 0 3 * * *");
        assert!(!scheduler.register(&bad, Arc::new(FailJob)).await);
        assert!(scheduler.register(&good, Arc::new(FailJob)).await);
        assert_eq!(scheduler.registered(), ["good".to_string()]);
    }

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: JobSpec =
            serde_json::from_str(r#"{"name": "aws", "cron": "0 0 * * * *"}"#).expect("spec");
        assert!(!spec.run_at_startup);
        assert_eq!(spec, JobSpec::new("aws", "0 0 * * * *"));
    }
}
