//! Domain errors for the service broker module.

use service_broker_sdk::{BrokerError, OperationState, OperationType, ServiceBrokerError};
use thiserror::Error;

/// Domain-level errors.
///
/// Expected per-item failures of a batch deletion are not represented here;
/// they are collected as [`service_broker_sdk::DeleteError`] values instead.
#[derive(Error, Debug)]
pub enum DomainError {
    /// A broker call timed out; the remote outcome is unknown.
    #[error(transparent)]
    BrokerTimeout(BrokerError),

    /// Last operations only move from `in progress` to a terminal state.
    #[error("illegal transition of {operation_type} operation from {from} to {to}")]
    InvalidTransition {
        operation_type: OperationType,
        from: OperationState,
        to: OperationState,
    },

    #[error("job scheduler error: {0}")]
    Scheduler(#[source] anyhow::Error),

    #[error("broker client setup failed: {message}")]
    BrokerClient { message: String },

    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),
}

impl DomainError {
    #[must_use]
    pub fn broker_client(message: impl Into<String>) -> Self {
        Self::BrokerClient {
            message: message.into(),
        }
    }
}

/// Convert `DomainError` to SDK `ServiceBrokerError`.
impl From<DomainError> for ServiceBrokerError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::BrokerTimeout(source) => Self::BrokerTimeout(source),
            other => Self::internal(other.to_string()),
        }
    }
}
