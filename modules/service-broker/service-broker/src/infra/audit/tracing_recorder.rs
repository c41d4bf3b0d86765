//! Audit trail written as structured log records on the `audit` target.

use async_trait::async_trait;
use service_broker_sdk::{RequestAttrs, ServiceInstance};
use tracing::info;

use crate::domain::ports::{InstanceEventAction, ServiceEventRecorder};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventRecorder;

impl TracingEventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Audit event type, e.g. `audit.service_instance.delete`.
#[must_use]
pub fn event_type(family: &str, action: InstanceEventAction) -> String {
    format!("audit.{family}.{}", action.as_str())
}

fn emit(
    family: &str,
    action: InstanceEventAction,
    instance: &ServiceInstance,
    attrs: &RequestAttrs,
) {
    let request = serde_json::Value::Object(attrs.0.clone());
    info!(
        target: "audit",
        event_type = %event_type(family, action),
        actee = %instance.guid,
        actee_name = %instance.name,
        space_guid = %instance.space_guid,
        request = %request,
        "Service instance event"
    );
}

#[async_trait]
impl ServiceEventRecorder for TracingEventRecorder {
    async fn record_service_instance_event(
        &self,
        action: InstanceEventAction,
        instance: &ServiceInstance,
        request_attrs: &RequestAttrs,
    ) -> anyhow::Result<()> {
        emit("service_instance", action, instance, request_attrs);
        Ok(())
    }

    async fn record_user_provided_service_instance_event(
        &self,
        action: InstanceEventAction,
        instance: &ServiceInstance,
        request_attrs: &RequestAttrs,
    ) -> anyhow::Result<()> {
        emit("user_provided_service_instance", action, instance, request_attrs);
        Ok(())
    }
}
