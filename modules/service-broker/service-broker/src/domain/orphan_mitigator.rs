//! Schedules cleanup for bindings whose unbind may or may not have happened.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use service_broker_sdk::{ServiceBinding, ServiceInstance};
use tracing::{error, info};

use super::jobs::{Job, OrphanedBindingJob, after};
use super::ports::JobScheduler;

pub struct OrphanMitigator {
    scheduler: Arc<dyn JobScheduler>,
    retry_delay: Duration,
}

impl OrphanMitigator {
    #[must_use]
    pub fn new(scheduler: Arc<dyn JobScheduler>, retry_delay: Duration) -> Self {
        Self {
            scheduler,
            retry_delay,
        }
    }

    /// Enqueue a retried unbind for `binding`.
    ///
    /// Enqueue failures are logged; the binding then has to be reconciled
    /// out of band.
    pub async fn cleanup_failed_unbind(
        &self,
        instance: &ServiceInstance,
        binding: &ServiceBinding,
    ) {
        let job = Job::DeleteOrphanedBinding(OrphanedBindingJob::new(instance.guid, binding.guid));
        let run_at = after(Utc::now(), self.retry_delay);

        match self.scheduler.enqueue(job, run_at).await {
            Ok(()) => info!(
                instance_guid = %instance.guid,
                binding_guid = %binding.guid,
                %run_at,
                "Scheduled orphan mitigation for binding"
            ),
            Err(e) => error!(
                instance_guid = %instance.guid,
                binding_guid = %binding.guid,
                error = %e,
                "Failed to schedule orphan mitigation, binding needs manual reconciliation"
            ),
        }
    }
}
