//! In-memory job queue.
//!
//! Jobs are kept per [`Job::key`]; enqueueing a job whose key is already
//! queued replaces the queued entry. Nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::jobs::Job;
use crate::domain::ports::JobScheduler;

/// Queued job with its due time.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub run_at: DateTime<Utc>,
    pub job: Job,
}

#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    entries: Mutex<HashMap<String, QueuedJob>>,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All queued jobs, earliest first.
    #[must_use]
    pub fn pending(&self) -> Vec<QueuedJob> {
        let mut pending: Vec<QueuedJob> = self.entries.lock().values().cloned().collect();
        pending.sort_by(|a, b| {
            a.run_at
                .cmp(&b.run_at)
                .then_with(|| a.job.key().cmp(&b.job.key()))
        });
        pending
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Earliest due time, if anything is queued.
    #[must_use]
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.entries.lock().values().map(|q| q.run_at).min()
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobQueue {
    async fn enqueue(&self, job: Job, run_at: DateTime<Utc>) -> anyhow::Result<()> {
        let key = job.key();
        let replaced = self
            .entries
            .lock()
            .insert(key.clone(), QueuedJob { run_at, job })
            .is_some();
        tracing::debug!(job_key = %key, %run_at, replaced, "Job enqueued");
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<Job>> {
        let mut entries = self.entries.lock();
        let mut due: Vec<(DateTime<Utc>, String)> = entries
            .iter()
            .filter(|(_, queued)| queued.run_at <= now)
            .map(|(key, queued)| (queued.run_at, key.clone()))
            .collect();
        due.sort();
        due.truncate(limit);

        Ok(due
            .into_iter()
            .filter_map(|(_, key)| entries.remove(&key))
            .map(|queued| queued.job)
            .collect())
    }
}
