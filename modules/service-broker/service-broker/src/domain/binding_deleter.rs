//! Deletes a single binding of a service instance.

use std::sync::Arc;
use std::time::Duration;

use service_broker_sdk::{BrokerError, DeleteError, ServiceBinding, ServiceInstance};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::calls::{bounded, instance_path};
use super::orphan_mitigator::OrphanMitigator;
use super::ports::{BrokerClient, BrokerResponse};
use super::repo::ServiceInstanceRepository;

/// Why a binding could not be deleted. The binding record is kept in every
/// case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingDeleteError {
    #[error("unbind accepted asynchronously")]
    UnbindInProgress,

    #[error(transparent)]
    Broker(BrokerError),

    /// The remote outcome is unknown.
    #[error(transparent)]
    Timeout(BrokerError),

    #[error("{0}")]
    Persistence(String),
}

impl BindingDeleteError {
    /// Per-item error reported to the caller of a batch deletion.
    #[must_use]
    pub fn into_delete_error(
        self,
        instance: &ServiceInstance,
        binding: &ServiceBinding,
    ) -> DeleteError {
        match self {
            Self::UnbindInProgress => DeleteError::UnbindInProgress {
                instance_name: instance.name.clone(),
                binding_guid: binding.guid,
            },
            Self::Broker(e) => DeleteError::Broker(e),
            Self::Timeout(source) => DeleteError::Timeout {
                instance_guid: instance.guid,
                source,
            },
            Self::Persistence(message) => DeleteError::persistence(instance.guid, message),
        }
    }
}

pub struct BindingDeleter {
    repo: Arc<dyn ServiceInstanceRepository>,
    broker: Arc<dyn BrokerClient>,
    orphan_mitigator: OrphanMitigator,
    broker_timeout: Duration,
}

impl BindingDeleter {
    #[must_use]
    pub fn new(
        repo: Arc<dyn ServiceInstanceRepository>,
        broker: Arc<dyn BrokerClient>,
        orphan_mitigator: OrphanMitigator,
        broker_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            broker,
            orphan_mitigator,
            broker_timeout,
        }
    }

    /// Unbind `binding` at the broker (managed instances only) and delete
    /// its local record.
    ///
    /// # Errors
    ///
    /// See [`BindingDeleteError`]. An ambiguous broker failure also
    /// schedules orphan mitigation before the error is returned.
    #[instrument(
        skip_all,
        fields(instance_guid = %instance.guid, binding_guid = %binding.guid)
    )]
    pub async fn delete_binding(
        &self,
        instance: &ServiceInstance,
        binding: &ServiceBinding,
        accepts_incomplete: bool,
    ) -> Result<(), BindingDeleteError> {
        let Some(plan) = instance.plan() else {
            return self.delete_record(binding).await;
        };

        let result = bounded(
            self.broker_timeout,
            "DELETE",
            || {
                format!(
                    "{}/service_bindings/{}",
                    instance_path(instance.guid),
                    binding.guid
                )
            },
            self.broker.unbind(instance, plan, binding, accepts_incomplete),
        )
        .await;

        match result {
            Ok(BrokerResponse::Completed | BrokerResponse::Gone) => {
                self.delete_record(binding).await
            }
            Ok(BrokerResponse::Accepted { .. }) => {
                info!("Unbind accepted asynchronously, keeping binding");
                Err(BindingDeleteError::UnbindInProgress)
            }
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "Unbind timed out");
                Err(BindingDeleteError::Timeout(e))
            }
            Err(e) if e.is_ambiguous() => {
                warn!(error = %e, "Unbind outcome unknown");
                self.orphan_mitigator
                    .cleanup_failed_unbind(instance, binding)
                    .await;
                Err(BindingDeleteError::Broker(e))
            }
            Err(e) => {
                warn!(error = %e, "Unbind rejected by broker");
                Err(BindingDeleteError::Broker(e))
            }
        }
    }

    async fn delete_record(&self, binding: &ServiceBinding) -> Result<(), BindingDeleteError> {
        match self.repo.delete_binding(binding).await {
            Ok(existed) => {
                debug!(existed, "Binding record deleted");
                Ok(())
            }
            Err(e) => Err(BindingDeleteError::Persistence(e.to_string())),
        }
    }
}
