//! Polls the broker for the outcome of an accepted asynchronous operation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_broker_sdk::{
    LastOperation, OperationState, OperationType, RequestAttrs, ServiceInstance,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{JobContext, JobOutcome, after};
use crate::domain::calls::{bounded, instance_path, record_event};
use crate::domain::error::DomainError;
use crate::domain::last_operation::{self, poll_expired_description, still_running};
use crate::domain::ports::LastOperationPoll;
use crate::domain::repo::InstanceTransaction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFetchJob {
    pub instance_guid: Uuid,
    #[serde(default)]
    pub request_attrs: serde_json::Map<String, serde_json::Value>,
    /// Base interval between polls, before backoff.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Number of polls already made.
    #[serde(default)]
    pub attempt: u32,
    /// Polling stops and the operation fails after this instant.
    pub end_timestamp: DateTime<Utc>,
}

impl StateFetchJob {
    #[must_use]
    pub fn new(
        instance_guid: Uuid,
        request_attrs: &RequestAttrs,
        poll_interval: Duration,
        now: DateTime<Utc>,
        max_poll_duration: Duration,
    ) -> Self {
        Self {
            instance_guid,
            request_attrs: request_attrs.0.clone(),
            poll_interval,
            attempt: 0,
            end_timestamp: after(now, max_poll_duration),
        }
    }

    fn request_attrs(&self) -> RequestAttrs {
        RequestAttrs(self.request_attrs.clone())
    }

    #[instrument(
        skip(self, ctx),
        fields(instance_guid = %self.instance_guid, attempt = self.attempt)
    )]
    pub(super) async fn run(self, ctx: &JobContext) -> Result<JobOutcome, DomainError> {
        let now = Utc::now();

        let Some(instance) = ctx.repo.find(self.instance_guid).await? else {
            info!("Service instance is gone, nothing to poll");
            return Ok(JobOutcome::Done);
        };
        let Some(op) = instance
            .last_operation
            .clone()
            .filter(LastOperation::is_in_progress)
        else {
            info!("No operation in progress, nothing to poll");
            return Ok(JobOutcome::Done);
        };
        let Some(plan) = instance.plan() else {
            return Ok(JobOutcome::Done);
        };

        if now >= self.end_timestamp {
            warn!(
                operation_type = %op.operation_type,
                "Giving up polling, operation did not finish in time"
            );
            self.fail(ctx, &op, Some(poll_expired_description(op.operation_type)))
                .await?;
            return Ok(JobOutcome::Done);
        }

        let poll = bounded(
            ctx.config.broker_timeout,
            "GET",
            || format!("{}/last_operation", instance_path(instance.guid)),
            ctx.broker
                .fetch_last_operation(&instance, plan, op.broker_operation.as_deref()),
        )
        .await;

        match poll {
            Ok(LastOperationPoll::State {
                state: OperationState::Succeeded,
                description,
                ..
            }) => {
                self.succeed(ctx, &op, description).await?;
                Ok(JobOutcome::Done)
            }
            Ok(LastOperationPoll::State {
                state: OperationState::Failed,
                description,
                ..
            }) => {
                self.fail(ctx, &op, description).await?;
                Ok(JobOutcome::Done)
            }
            Ok(LastOperationPoll::State {
                state: OperationState::InProgress,
                description,
                retry_after,
            }) => {
                self.update_description(ctx, &op, description).await?;
                Ok(self.reschedule(ctx, now, retry_after))
            }
            Ok(LastOperationPoll::Gone) if op.operation_type == OperationType::Delete => {
                self.succeed(ctx, &op, None).await?;
                Ok(JobOutcome::Done)
            }
            Ok(LastOperationPoll::Gone) => {
                self.fail(ctx, &op, None).await?;
                Ok(JobOutcome::Done)
            }
            Err(e) => {
                warn!(error = %e, "Last operation poll failed, retrying later");
                Ok(self.reschedule(ctx, now, None))
            }
        }
    }

    /// Lock the instance and return it only while `expected` is still the
    /// running operation. Dropping the returned transaction rolls it back.
    async fn lock_running(
        &self,
        ctx: &JobContext,
        expected: &LastOperation,
    ) -> Result<Option<(Box<dyn InstanceTransaction>, ServiceInstance)>, DomainError> {
        let mut tx = ctx.repo.begin().await?;
        let Some(instance) = tx.lock_and_reload(self.instance_guid).await? else {
            return Ok(None);
        };
        if !still_running(instance.last_operation.as_ref(), expected) {
            info!("Operation was finished or replaced concurrently");
            return Ok(None);
        }
        Ok(Some((tx, instance)))
    }

    async fn succeed(
        &self,
        ctx: &JobContext,
        expected: &LastOperation,
        description: Option<String>,
    ) -> Result<(), DomainError> {
        let Some((mut tx, mut instance)) = self.lock_running(ctx, expected).await? else {
            return Ok(());
        };

        if expected.operation_type == OperationType::Delete {
            tx.destroy(instance.guid).await?;
            tx.commit().await?;
            info!("Service instance deprovisioned");
        } else {
            if let Some(op) = instance.last_operation.as_mut() {
                last_operation::transition(op, OperationState::Succeeded, description, Utc::now())?;
            }
            tx.save(&instance).await?;
            tx.commit().await?;
            info!(operation_type = %expected.operation_type, "Operation succeeded");
        }

        record_event(
            ctx.events.as_ref(),
            expected.operation_type.into(),
            &instance,
            &self.request_attrs(),
        )
        .await;
        Ok(())
    }

    async fn fail(
        &self,
        ctx: &JobContext,
        expected: &LastOperation,
        description: Option<String>,
    ) -> Result<(), DomainError> {
        let Some((mut tx, mut instance)) = self.lock_running(ctx, expected).await? else {
            return Ok(());
        };
        if let Some(op) = instance.last_operation.as_mut() {
            last_operation::transition(op, OperationState::Failed, description, Utc::now())?;
        }
        tx.save(&instance).await?;
        tx.commit().await?;
        warn!(operation_type = %expected.operation_type, "Operation failed");
        Ok(())
    }

    async fn update_description(
        &self,
        ctx: &JobContext,
        expected: &LastOperation,
        description: Option<String>,
    ) -> Result<(), DomainError> {
        if description.is_none() || expected.description == description {
            return Ok(());
        }
        let Some((mut tx, mut instance)) = self.lock_running(ctx, expected).await? else {
            return Ok(());
        };
        let changed = instance
            .last_operation
            .as_mut()
            .is_some_and(|op| last_operation::describe(op, description, Utc::now()));
        if changed {
            tx.save(&instance).await?;
            tx.commit().await?;
        }
        Ok(())
    }

    fn reschedule(
        mut self,
        ctx: &JobContext,
        now: DateTime<Utc>,
        retry_after: Option<Duration>,
    ) -> JobOutcome {
        let config = &ctx.config;
        let backoff = config.poll_backoff.delay(
            self.poll_interval,
            self.attempt,
            config.max_async_poll_interval,
        );
        let delay = retry_after
            .map_or(backoff, |hint| hint.max(backoff))
            .min(config.max_async_poll_interval);

        self.attempt = self.attempt.saturating_add(1);
        let run_at = after(now, delay).min(self.end_timestamp);
        JobOutcome::Reschedule {
            run_at,
            job: super::Job::ServiceInstanceStateFetch(self),
        }
    }
}
