//! Background runner executing due jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::JobRunnerConfig;
use crate::domain::error::DomainError;
use crate::domain::jobs::{Job, JobContext, JobOutcome, after};
use crate::domain::ports::JobScheduler;

pub struct JobRunner {
    scheduler: Arc<dyn JobScheduler>,
    ctx: JobContext,
    config: JobRunnerConfig,
}

impl JobRunner {
    #[must_use]
    pub fn new(scheduler: Arc<dyn JobScheduler>, ctx: JobContext) -> Self {
        let config = ctx.config.job_runner.clone();
        Self {
            scheduler,
            ctx,
            config,
        }
    }

    /// Run the jobs due at `now`, one batch. Returns how many ran.
    ///
    /// Every taken job runs even when re-enqueueing an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns `Scheduler` when the queue cannot be read, or when some jobs
    /// could not be re-enqueued after the whole batch ran.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize, DomainError> {
        let jobs = self
            .scheduler
            .take_due(now, self.config.batch_size)
            .await
            .map_err(DomainError::Scheduler)?;
        let count = jobs.len();
        let mut lost = 0_usize;

        for job in jobs {
            let name = job.name();
            let key = job.key();
            let (run_at, next) = match job.clone().run(&self.ctx).await {
                Ok(JobOutcome::Done) => {
                    debug!(job = name, job_key = %key, "Job finished");
                    continue;
                }
                Ok(JobOutcome::Reschedule { run_at, job }) => (run_at, job),
                Err(e) => {
                    error!(job = name, job_key = %key, error = %e, "Job failed, retrying later");
                    (after(Utc::now(), self.config.failure_retry_delay), job)
                }
            };
            if let Err(e) = self.reschedule(next, run_at).await {
                error!(job = name, job_key = %key, error = %e, "Failed to re-enqueue job");
                lost += 1;
            }
        }

        if lost > 0 {
            return Err(DomainError::Scheduler(anyhow::anyhow!(
                "{lost} of {count} job(s) could not be re-enqueued"
            )));
        }
        Ok(count)
    }

    async fn reschedule(&self, job: Job, run_at: DateTime<Utc>) -> anyhow::Result<()> {
        debug!(job = job.name(), job_key = %job.key(), %run_at, "Job rescheduled");
        self.scheduler.enqueue(job, run_at).await
    }

    /// Tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(tick = ?self.config.tick_interval, "Job runner started");
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("Job runner stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_due(Utc::now()).await {
                        error!(error = %e, "Job runner tick failed");
                    }
                }
            }
        }
    }
}
