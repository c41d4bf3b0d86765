//! Retried unbind for a binding whose unbind outcome was ambiguous.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{Job, JobContext, JobOutcome, after};
use crate::config::PollBackoff;
use crate::domain::calls::{bounded, instance_path};
use crate::domain::error::DomainError;
use crate::domain::ports::BrokerResponse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedBindingJob {
    pub instance_guid: Uuid,
    pub binding_guid: Uuid,
    /// Unbind attempts already made by this job.
    #[serde(default)]
    pub attempt: u32,
}

impl OrphanedBindingJob {
    #[must_use]
    pub fn new(instance_guid: Uuid, binding_guid: Uuid) -> Self {
        Self {
            instance_guid,
            binding_guid,
            attempt: 0,
        }
    }

    #[instrument(
        skip(self, ctx),
        fields(
            instance_guid = %self.instance_guid,
            binding_guid = %self.binding_guid,
            attempt = self.attempt
        )
    )]
    pub(super) async fn run(mut self, ctx: &JobContext) -> Result<JobOutcome, DomainError> {
        let Some(instance) = ctx.repo.find(self.instance_guid).await? else {
            warn!("Service instance is gone, dropping orphan mitigation");
            return Ok(JobOutcome::Done);
        };
        let Some(plan) = instance.plan() else {
            return Ok(JobOutcome::Done);
        };

        let mut bindings = ctx.repo.app_bindings(instance.guid).await?;
        bindings.extend(ctx.repo.route_bindings(instance.guid).await?);
        let Some(binding) = bindings.into_iter().find(|b| b.guid == self.binding_guid) else {
            info!("Binding already deleted");
            return Ok(JobOutcome::Done);
        };

        let result = bounded(
            ctx.config.broker_timeout,
            "DELETE",
            || format!("{}/service_bindings/{}", instance_path(instance.guid), binding.guid),
            ctx.broker.unbind(&instance, plan, &binding, false),
        )
        .await;

        match result {
            Ok(BrokerResponse::Completed | BrokerResponse::Gone) => {
                ctx.repo.delete_binding(&binding).await?;
                info!("Orphaned binding unbound and deleted");
                return Ok(JobOutcome::Done);
            }
            Ok(BrokerResponse::Accepted { .. }) => {
                warn!("Broker answered an orphan unbind asynchronously");
            }
            Err(e) => {
                warn!(error = %e, "Orphan unbind failed");
            }
        }

        let mitigation = &ctx.config.orphan_mitigation;
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt >= mitigation.max_attempts {
            error!(
                attempts = self.attempt,
                "Giving up on orphaned binding, it needs manual reconciliation"
            );
            return Ok(JobOutcome::Done);
        }

        let delay = PollBackoff::Exponential { multiplier: 2 }.delay(
            mitigation.retry_delay,
            self.attempt - 1,
            ctx.config.max_async_poll_interval,
        );
        Ok(JobOutcome::Reschedule {
            run_at: after(Utc::now(), delay),
            job: Job::DeleteOrphanedBinding(self),
        })
    }
}
