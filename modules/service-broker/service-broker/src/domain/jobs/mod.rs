//! Deferred work scheduled by the deletion flow.
//!
//! Jobs are plain serializable values. Running a job never schedules anything
//! itself; it returns a [`JobOutcome`] and the runner re-enqueues
//! rescheduled jobs.

pub mod orphaned_binding;
pub mod state_fetch;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub use orphaned_binding::OrphanedBindingJob;
pub use state_fetch::StateFetchJob;

use super::error::DomainError;
use super::ports::{BrokerClient, ServiceEventRecorder};
use super::repo::ServiceInstanceRepository;
use crate::config::ServiceBrokerConfig;

pub const STATE_FETCH_JOB_NAME: &str = "service-instance-state-fetch";
pub const DELETE_ORPHANED_BINDING_JOB_NAME: &str = "delete-orphaned-binding";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Job {
    #[serde(rename = "service-instance-state-fetch")]
    ServiceInstanceStateFetch(StateFetchJob),
    #[serde(rename = "delete-orphaned-binding")]
    DeleteOrphanedBinding(OrphanedBindingJob),
}

impl Job {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServiceInstanceStateFetch(_) => STATE_FETCH_JOB_NAME,
            Self::DeleteOrphanedBinding(_) => DELETE_ORPHANED_BINDING_JOB_NAME,
        }
    }

    /// Deduplication key. At most one job per key is queued at a time, so
    /// an instance is never polled by two jobs at once.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::ServiceInstanceStateFetch(job) => {
                format!("{STATE_FETCH_JOB_NAME}:{}", job.instance_guid)
            }
            Self::DeleteOrphanedBinding(job) => {
                format!("{DELETE_ORPHANED_BINDING_JOB_NAME}:{}", job.binding_guid)
            }
        }
    }

    /// Execute one step of the job.
    ///
    /// # Errors
    ///
    /// Returns an error when local storage fails; the caller retries later.
    pub async fn run(self, ctx: &JobContext) -> Result<JobOutcome, DomainError> {
        match self {
            Self::ServiceInstanceStateFetch(job) => job.run(ctx).await,
            Self::DeleteOrphanedBinding(job) => job.run(ctx).await,
        }
    }
}

/// Result of one job step.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done,
    Reschedule { run_at: DateTime<Utc>, job: Job },
}

/// Dependencies available to running jobs.
#[derive(Clone)]
pub struct JobContext {
    pub repo: Arc<dyn ServiceInstanceRepository>,
    pub broker: Arc<dyn BrokerClient>,
    pub events: Arc<dyn ServiceEventRecorder>,
    pub config: Arc<ServiceBrokerConfig>,
}

/// `now + delay`, saturating at the largest representable time.
#[must_use]
pub fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
