//! Service broker error types.
//!
//! Transport-agnostic error definitions shared by the module and its callers.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Failure talking to a service broker.
///
/// `Timeout` means no response arrived, so the remote outcome is unknown.
/// Every other variant describes a definite response (or a request that never
/// left this process).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No response within the configured timeout.
    #[error("The service broker did not respond within {} seconds ({method} {uri})", timeout.as_secs())]
    Timeout {
        method: &'static str,
        uri: String,
        timeout: Duration,
    },

    /// Connection could not be established.
    #[error("The service broker could not be reached: {message} ({method} {uri})")]
    Unreachable {
        method: &'static str,
        uri: String,
        message: String,
    },

    /// The broker answered with a status that is not a success for this call.
    #[error("{}", bad_response_message(*status, error.as_deref(), description.as_deref()))]
    BadResponse {
        method: &'static str,
        uri: String,
        status: u16,
        error: Option<String>,
        description: Option<String>,
    },

    /// 422 `AsyncRequired`: the broker only supports asynchronous operations.
    #[error("This service plan requires client support for asynchronous service operations.")]
    AsyncRequired { method: &'static str, uri: String },

    /// 422 `ConcurrencyError`: another operation is running at the broker.
    #[error("The service broker rejected the request due to an operation being in progress for the service instance.")]
    ConcurrencyError { method: &'static str, uri: String },

    /// A success status whose body could not be interpreted.
    #[error("The service broker returned an invalid response: {reason} ({method} {uri}, status {status})")]
    ResponseMalformed {
        method: &'static str,
        uri: String,
        status: u16,
        reason: String,
    },
}

fn bad_response_message(status: u16, error: Option<&str>, description: Option<&str>) -> String {
    let detail = match (error, description) {
        (_, Some(description)) => description.to_owned(),
        (Some(error), None) => error.to_owned(),
        (None, None) => "no description provided".to_owned(),
    };
    format!("Service broker error: status {status}: {detail}")
}

impl BrokerError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the request reached the broker but its outcome is uncertain:
    /// a 5xx answer or a success status with an unreadable body.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        match self {
            Self::BadResponse { status, .. } => *status >= 500,
            Self::ResponseMalformed { .. } => true,
            _ => false,
        }
    }

    /// HTTP status returned by the broker, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BadResponse { status, .. } | Self::ResponseMalformed { status, .. } => {
                Some(*status)
            }
            Self::AsyncRequired { .. } | Self::ConcurrencyError { .. } => Some(422),
            Self::Timeout { .. } | Self::Unreachable { .. } => None,
        }
    }

    /// API error name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "ServiceBrokerRequestTimeout",
            Self::Unreachable { .. } => "ServiceBrokerApiUnreachable",
            Self::BadResponse { .. } => "ServiceBrokerBadResponse",
            Self::AsyncRequired { .. } => "AsyncRequired",
            Self::ConcurrencyError { .. } => "ServiceBrokerConcurrencyError",
            Self::ResponseMalformed { .. } => "ServiceBrokerResponseMalformed",
        }
    }
}

/// Per-item error reported by a batch deletion.
///
/// A batch never stops on these: the remaining instances are still processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeleteError {
    /// The instance has an operation in progress, so nothing was touched.
    #[error("An operation for service instance {instance_name} is in progress.")]
    OperationInProgress {
        instance_guid: Uuid,
        instance_name: String,
    },

    /// The broker accepted an asynchronous unbind; the binding still exists.
    #[error("An unbind operation for the service binding {binding_guid} of service instance {instance_name} is in progress.")]
    UnbindInProgress {
        instance_name: String,
        binding_guid: Uuid,
    },

    /// The broker rejected an unbind or deprovision.
    #[error(transparent)]
    Broker(BrokerError),

    /// A broker call timed out and the configured policy is to continue.
    #[error("{source}")]
    Timeout {
        instance_guid: Uuid,
        source: BrokerError,
    },

    /// Local storage failed; the message is the underlying error text.
    #[error("{message}")]
    Persistence { instance_guid: Uuid, message: String },
}

impl DeleteError {
    #[must_use]
    pub fn operation_in_progress(instance_guid: Uuid, instance_name: impl Into<String>) -> Self {
        Self::OperationInProgress {
            instance_guid,
            instance_name: instance_name.into(),
        }
    }

    #[must_use]
    pub fn persistence(instance_guid: Uuid, message: impl Into<String>) -> Self {
        Self::Persistence {
            instance_guid,
            message: message.into(),
        }
    }

    /// API error name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OperationInProgress { .. } => "AsyncServiceInstanceOperationInProgress",
            Self::UnbindInProgress { .. } => "AsyncServiceBindingOperationInProgress",
            Self::Broker(e) | Self::Timeout { source: e, .. } => e.name(),
            Self::Persistence { .. } => "PersistenceFailure",
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Error returned by [`crate::ServiceInstancesApi`] calls.
#[derive(Error, Debug, Clone)]
pub enum ServiceBrokerError {
    /// A broker call timed out and the batch was aborted.
    #[error(transparent)]
    BrokerTimeout(BrokerError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ServiceBrokerError {
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
