//! Batch deletion of service instances.
//!
//! Instances are processed one at a time in input order. For each instance
//! the bindings are deleted first, then the instance is deprovisioned (managed)
//! or destroyed locally (user-provided). A failure on one instance is
//! recorded and the batch moves on; work already completed is never undone.

use std::sync::Arc;

use chrono::Utc;
use service_broker_sdk::{
    DeleteError, DeleteOptions, OperationState, OperationType, ServiceInstance, ServicePlan,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::binding_deleter::{BindingDeleteError, BindingDeleter};
use super::calls::{bounded, instance_path, record_event};
use super::error::DomainError;
use super::jobs::{Job, StateFetchJob};
use super::last_operation;
use super::orphan_mitigator::OrphanMitigator;
use super::ports::{
    BrokerClient, BrokerResponse, InstanceEventAction, JobScheduler, ServiceEventRecorder,
};
use super::repo::ServiceInstanceRepository;
use crate::config::{ServiceBrokerConfig, TimeoutPolicy};

pub struct InstanceDeleter {
    repo: Arc<dyn ServiceInstanceRepository>,
    broker: Arc<dyn BrokerClient>,
    events: Arc<dyn ServiceEventRecorder>,
    scheduler: Arc<dyn JobScheduler>,
    bindings: BindingDeleter,
    config: Arc<ServiceBrokerConfig>,
}

impl InstanceDeleter {
    #[must_use]
    pub fn new(
        repo: Arc<dyn ServiceInstanceRepository>,
        broker: Arc<dyn BrokerClient>,
        events: Arc<dyn ServiceEventRecorder>,
        scheduler: Arc<dyn JobScheduler>,
        config: Arc<ServiceBrokerConfig>,
    ) -> Self {
        let orphan_mitigator = OrphanMitigator::new(
            Arc::clone(&scheduler),
            config.orphan_mitigation.retry_delay,
        );
        let bindings = BindingDeleter::new(
            Arc::clone(&repo),
            Arc::clone(&broker),
            orphan_mitigator,
            config.broker_timeout,
        );
        Self {
            repo,
            broker,
            events,
            scheduler,
            bindings,
            config,
        }
    }

    /// Delete the given instances and their bindings.
    ///
    /// Returns the per-item errors in the order they were encountered. Missing
    /// instances are skipped without error.
    ///
    /// # Errors
    ///
    /// Returns `BrokerTimeout` when a broker call timed out and the timeout
    /// policy is `abort`. Instances processed before that keep their state.
    #[instrument(
        skip_all,
        fields(count = guids.len(), multipart = options.multipart_delete)
    )]
    pub async fn delete(
        &self,
        guids: &[Uuid],
        options: &DeleteOptions,
    ) -> Result<Vec<DeleteError>, DomainError> {
        let accepts_incomplete = options
            .accepts_incomplete
            .unwrap_or(self.config.accepts_incomplete);
        let mut errors = Vec::new();

        for &guid in guids {
            match self
                .delete_instance(guid, accepts_incomplete, options, &mut errors)
                .await
            {
                Ok(()) => {}
                Err(DomainError::BrokerTimeout(source))
                    if self.config.on_broker_timeout == TimeoutPolicy::Continue =>
                {
                    errors.push(DeleteError::Timeout {
                        instance_guid: guid,
                        source,
                    });
                }
                Err(DomainError::Repository(e)) => {
                    errors.push(DeleteError::persistence(guid, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        info!(errors = errors.len(), "Service instance deletion finished");
        Ok(errors)
    }

    #[instrument(skip_all, fields(instance_guid = %guid))]
    async fn delete_instance(
        &self,
        guid: Uuid,
        accepts_incomplete: bool,
        options: &DeleteOptions,
        errors: &mut Vec<DeleteError>,
    ) -> Result<(), DomainError> {
        let Some(instance) = self.repo.find(guid).await? else {
            debug!("Service instance already deleted");
            return Ok(());
        };

        let mut bindings = self.repo.app_bindings(guid).await?;
        bindings.extend(self.repo.route_bindings(guid).await?);

        if instance.operation_in_progress() {
            let count = bindings.len().max(1);
            errors.extend(std::iter::repeat_n(
                DeleteError::operation_in_progress(guid, &instance.name),
                count,
            ));
            return Ok(());
        }

        let mut binding_failed = false;
        for binding in &bindings {
            match self
                .bindings
                .delete_binding(&instance, binding, accepts_incomplete)
                .await
            {
                Ok(()) => {}
                Err(BindingDeleteError::Timeout(source)) => {
                    return Err(DomainError::BrokerTimeout(source));
                }
                Err(e) => {
                    errors.push(e.into_delete_error(&instance, binding));
                    binding_failed = true;
                }
            }
        }
        if binding_failed {
            info!("Keeping service instance, some bindings could not be deleted");
            return Ok(());
        }

        match instance.plan() {
            Some(plan) => {
                self.deprovision(&instance, plan, accepts_incomplete, options, errors)
                    .await
            }
            None => {
                self.delete_user_provided(&instance, options, errors).await;
                Ok(())
            }
        }
    }

    async fn delete_user_provided(
        &self,
        instance: &ServiceInstance,
        options: &DeleteOptions,
        errors: &mut Vec<DeleteError>,
    ) {
        match self.destroy(instance.guid).await {
            Ok(true) => {
                info!("User-provided service instance deleted");
                record_event(
                    self.events.as_ref(),
                    InstanceEventAction::Delete,
                    instance,
                    &options.request_attrs,
                )
                .await;
            }
            Ok(false) => {}
            Err(e) => errors.push(DeleteError::persistence(instance.guid, e.to_string())),
        }
    }

    async fn deprovision(
        &self,
        instance: &ServiceInstance,
        plan: &ServicePlan,
        accepts_incomplete: bool,
        options: &DeleteOptions,
        errors: &mut Vec<DeleteError>,
    ) -> Result<(), DomainError> {
        let guid = instance.guid;

        let mut tx = self.repo.begin().await?;
        let Some(mut locked) = tx.lock_and_reload(guid).await? else {
            return Ok(());
        };
        if locked.operation_in_progress() {
            errors.push(DeleteError::operation_in_progress(guid, &locked.name));
            return Ok(());
        }
        locked.last_operation = Some(last_operation::start(OperationType::Delete, Utc::now()));
        tx.save(&locked).await?;
        tx.commit().await?;

        let result = bounded(
            self.config.broker_timeout,
            "DELETE",
            || instance_path(guid),
            self.broker.deprovision(&locked, plan, accepts_incomplete),
        )
        .await;

        match result {
            Ok(BrokerResponse::Completed | BrokerResponse::Gone) => match self.destroy(guid).await {
                Ok(true) => {
                    info!("Service instance deprovisioned");
                    record_event(
                        self.events.as_ref(),
                        InstanceEventAction::Delete,
                        &locked,
                        &options.request_attrs,
                    )
                    .await;
                }
                Ok(false) => {}
                Err(e) => {
                    let message = e.to_string();
                    self.mark_failed_logged(guid, Some(message.clone())).await;
                    errors.push(DeleteError::persistence(guid, message));
                }
            },
            Ok(BrokerResponse::Accepted { operation }) => {
                self.accept(&locked, operation, options, errors).await;
            }
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "Deprovision timed out");
                self.mark_failed_logged(guid, None).await;
                return Err(DomainError::BrokerTimeout(e));
            }
            Err(e) => {
                warn!(error = %e, "Deprovision rejected by broker");
                self.mark_failed_logged(guid, Some(e.to_string())).await;
                errors.push(DeleteError::Broker(e));
            }
        }
        Ok(())
    }

    /// Store the broker's operation token and schedule polling.
    ///
    /// The poll job is scheduled even when the token cannot be stored; the
    /// poller then asks the broker without an operation id.
    async fn accept(
        &self,
        instance: &ServiceInstance,
        operation: Option<String>,
        options: &DeleteOptions,
        errors: &mut Vec<DeleteError>,
    ) {
        let guid = instance.guid;
        let now = Utc::now();

        if let Err(e) = self.save_broker_operation(guid, operation).await {
            error!(error = %e, "Failed to store broker operation");
        }

        let job = StateFetchJob::new(
            guid,
            &options.request_attrs,
            self.config.default_async_poll_interval,
            now,
            self.config.max_async_poll_duration,
        );
        if let Err(e) = self
            .scheduler
            .enqueue(Job::ServiceInstanceStateFetch(job), now)
            .await
        {
            error!(error = %e, "Failed to schedule last operation polling");
            self.mark_failed_logged(guid, Some("Failed to schedule status polling.".to_owned()))
                .await;
            errors.push(DeleteError::persistence(guid, e.to_string()));
            return;
        }

        info!("Deprovision accepted, polling for completion");
        if options.multipart_delete {
            errors.push(DeleteError::operation_in_progress(guid, &instance.name));
        }
    }

    async fn save_broker_operation(
        &self,
        guid: Uuid,
        operation: Option<String>,
    ) -> anyhow::Result<()> {
        let mut tx = self.repo.begin().await?;
        let Some(mut instance) = tx.lock_and_reload(guid).await? else {
            return Ok(());
        };
        if let Some(op) = instance
            .last_operation
            .as_mut()
            .filter(|op| op.is_in_progress())
        {
            last_operation::accept(op, operation, Utc::now());
        }
        tx.save(&instance).await?;
        tx.commit().await
    }

    /// Destroy the instance row. Returns `false` when it was already gone.
    async fn destroy(&self, guid: Uuid) -> anyhow::Result<bool> {
        let mut tx = self.repo.begin().await?;
        if tx.lock_and_reload(guid).await?.is_none() {
            return Ok(false);
        }
        tx.destroy(guid).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Move the running delete operation to `failed`.
    async fn mark_failed(&self, guid: Uuid, description: Option<String>) -> anyhow::Result<()> {
        let mut tx = self.repo.begin().await?;
        let Some(mut instance) = tx.lock_and_reload(guid).await? else {
            return Ok(());
        };
        let Some(op) = instance
            .last_operation
            .as_mut()
            .filter(|op| op.is_in_progress())
        else {
            return Ok(());
        };
        last_operation::transition(op, OperationState::Failed, description, Utc::now())?;
        tx.save(&instance).await?;
        tx.commit().await?;
        Ok(())
    }

    /// [`Self::mark_failed`] for paths that already report an error of their
    /// own; a storage failure here is only logged.
    async fn mark_failed_logged(&self, guid: Uuid, description: Option<String>) {
        if let Err(e) = self.mark_failed(guid, description).await {
            error!(error = %e, "Failed to mark deletion as failed");
        }
    }
}
