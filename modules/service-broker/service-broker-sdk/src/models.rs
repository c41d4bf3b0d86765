//! Service broker domain models.
//!
//! These are transport-agnostic models used across the SDK.
//! Note: NO serde derives here - these are pure domain models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

/// Kind of operation tracked by a [`LastOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    /// Wire representation used by the broker protocol and audit records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a [`LastOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

impl OperationState {
    /// Wire representation used by the broker protocol.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// `succeeded` and `failed` are terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a broker reports an operation state outside the protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation state: {0}")]
pub struct UnknownOperationState(pub String);

impl FromStr for OperationState {
    type Err = UnknownOperationState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownOperationState(other.to_owned())),
        }
    }
}

/// The most recent asynchronous operation started against a service instance.
///
/// Owned exclusively by one instance and replaced, never merged, when a new
/// operation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastOperation {
    pub operation_type: OperationType,
    pub state: OperationState,
    pub description: Option<String>,
    /// Opaque operation token returned by the broker with a 202 response.
    pub broker_operation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LastOperation {
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.state == OperationState::InProgress
    }
}

/// Endpoint and credentials of a registered service broker.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceBroker {
    pub guid: Uuid,
    pub name: String,
    pub broker_url: Url,
    pub auth_username: String,
    pub auth_password: String,
}

impl fmt::Debug for ServiceBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBroker")
            .field("guid", &self.guid)
            .field("name", &self.name)
            .field("broker_url", &self.broker_url.as_str())
            .field("auth_username", &self.auth_username)
            .field("auth_password", &"<redacted>")
            .finish()
    }
}

/// Plan of a managed service instance, with the broker-side identifiers the
/// broker protocol requires on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlan {
    pub guid: Uuid,
    pub name: String,
    /// Broker catalog id of the service offering.
    pub service_id: String,
    /// Broker catalog id of the plan.
    pub plan_id: String,
    pub broker: ServiceBroker,
}

/// Distinguishes broker-backed instances from user-provided ones.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceKind {
    Managed {
        plan: ServicePlan,
    },
    UserProvided {
        credentials: serde_json::Value,
        syslog_drain_url: Option<String>,
        route_service_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstance {
    pub guid: Uuid,
    pub name: String,
    pub space_guid: Uuid,
    pub kind: InstanceKind,
    /// Always `None` for user-provided instances.
    pub last_operation: Option<LastOperation>,
}

impl ServiceInstance {
    #[must_use]
    pub fn is_managed(&self) -> bool {
        matches!(self.kind, InstanceKind::Managed { .. })
    }

    #[must_use]
    pub fn plan(&self) -> Option<&ServicePlan> {
        match &self.kind {
            InstanceKind::Managed { plan } => Some(plan),
            InstanceKind::UserProvided { .. } => None,
        }
    }

    /// True when there is no last operation or it reached a terminal state.
    #[must_use]
    pub fn terminal_state(&self) -> bool {
        self.last_operation
            .as_ref()
            .is_none_or(|op| op.state.is_terminal())
    }

    #[must_use]
    pub fn operation_in_progress(&self) -> bool {
        self.last_operation
            .as_ref()
            .is_some_and(LastOperation::is_in_progress)
    }

    #[must_use]
    pub fn create_failed(&self) -> bool {
        self.last_operation_is(OperationType::Create, OperationState::Failed)
    }

    #[must_use]
    pub fn create_in_progress(&self) -> bool {
        self.last_operation_is(OperationType::Create, OperationState::InProgress)
    }

    fn last_operation_is(&self, operation_type: OperationType, state: OperationState) -> bool {
        self.last_operation
            .as_ref()
            .is_some_and(|op| op.operation_type == operation_type && op.state == state)
    }
}

/// Resource a binding attaches a service instance to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    App { app_guid: Uuid },
    Route { route_guid: Uuid },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceBinding {
    pub guid: Uuid,
    pub service_instance_guid: Uuid,
    pub kind: BindingKind,
    pub credentials: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ServiceBinding {
    #[must_use]
    pub fn is_route_binding(&self) -> bool {
        matches!(self.kind, BindingKind::Route { .. })
    }
}

/// Request attributes forwarded to audit events and deferred jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestAttrs(pub serde_json::Map<String, serde_json::Value>);

impl RequestAttrs {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Options controlling one batch deletion.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// `None` falls back to the configured default.
    pub accepts_incomplete: Option<bool>,
    /// Report an accepted asynchronous deprovision as a failure.
    pub multipart_delete: bool,
    pub request_attrs: RequestAttrs,
}

impl DeleteOptions {
    #[must_use]
    pub fn accepts_incomplete(mut self, value: bool) -> Self {
        self.accepts_incomplete = Some(value);
        self
    }

    #[must_use]
    pub fn multipart(mut self) -> Self {
        self.multipart_delete = true;
        self
    }

    #[must_use]
    pub fn with_request_attrs(mut self, attrs: RequestAttrs) -> Self {
        self.request_attrs = attrs;
        self
    }
}
