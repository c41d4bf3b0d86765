//! Helpers around calls into output ports.

use std::future::Future;
use std::time::Duration;

use service_broker_sdk::{BrokerError, OperationType, RequestAttrs, ServiceInstance};
use tracing::warn;

use super::ports::{InstanceEventAction, ServiceEventRecorder};

/// Await a broker call, giving up after `timeout`.
///
/// `path` only identifies the request in the resulting error.
pub async fn bounded<T, F>(
    timeout: Duration,
    method: &'static str,
    path: impl FnOnce() -> String,
    call: F,
) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(BrokerError::Timeout {
            method,
            uri: path(),
            timeout,
        }),
    }
}

#[must_use]
pub fn instance_path(instance_guid: uuid::Uuid) -> String {
    format!("/v2/service_instances/{instance_guid}")
}

impl From<OperationType> for InstanceEventAction {
    fn from(operation_type: OperationType) -> Self {
        match operation_type {
            OperationType::Create => Self::Create,
            OperationType::Update => Self::Update,
            OperationType::Delete => Self::Delete,
        }
    }
}

/// Record an audit event for `instance`, picking the event family from its
/// kind. Failures are logged and swallowed.
pub async fn record_event(
    events: &dyn ServiceEventRecorder,
    action: InstanceEventAction,
    instance: &ServiceInstance,
    request_attrs: &RequestAttrs,
) {
    let result = if instance.is_managed() {
        events
            .record_service_instance_event(action, instance, request_attrs)
            .await
    } else {
        events
            .record_user_provided_service_instance_event(action, instance, request_attrs)
            .await
    };

    if let Err(e) = result {
        warn!(
            instance_guid = %instance.guid,
            action = action.as_str(),
            error = %e,
            "Failed to record service instance event"
        );
    }
}
