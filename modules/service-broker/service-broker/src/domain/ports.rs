//! Output ports (interfaces) for domain services.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_broker_sdk::{
    BrokerError, OperationState, RequestAttrs, ServiceBinding, ServiceInstance, ServicePlan,
};

use super::jobs::Job;

/// Normalized answer to an unbind or deprovision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerResponse {
    /// The broker finished the operation synchronously.
    Completed,
    /// The broker accepted the request and completes it asynchronously.
    Accepted { operation: Option<String> },
    /// The resource no longer exists at the broker.
    Gone,
}

/// Normalized answer to a last-operation poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastOperationPoll {
    State {
        state: OperationState,
        description: Option<String>,
        retry_after: Option<Duration>,
    },
    Gone,
}

/// Port for talking to service brokers.
///
/// Implementations do not enforce the call timeout themselves; callers bound
/// every call with the configured broker timeout.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn deprovision(
        &self,
        instance: &ServiceInstance,
        plan: &ServicePlan,
        accepts_incomplete: bool,
    ) -> Result<BrokerResponse, BrokerError>;

    async fn unbind(
        &self,
        instance: &ServiceInstance,
        plan: &ServicePlan,
        binding: &ServiceBinding,
        accepts_incomplete: bool,
    ) -> Result<BrokerResponse, BrokerError>;

    async fn fetch_last_operation(
        &self,
        instance: &ServiceInstance,
        plan: &ServicePlan,
        operation: Option<&str>,
    ) -> Result<LastOperationPoll, BrokerError>;
}

/// Audited instance actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceEventAction {
    Create,
    Update,
    Delete,
}

impl InstanceEventAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Port for the audit trail.
///
/// Callers log and swallow recording failures.
#[async_trait]
pub trait ServiceEventRecorder: Send + Sync {
    async fn record_service_instance_event(
        &self,
        action: InstanceEventAction,
        instance: &ServiceInstance,
        request_attrs: &RequestAttrs,
    ) -> anyhow::Result<()>;

    async fn record_user_provided_service_instance_event(
        &self,
        action: InstanceEventAction,
        instance: &ServiceInstance,
        request_attrs: &RequestAttrs,
    ) -> anyhow::Result<()>;
}

/// Port for the durable job queue.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedule `job` to run at `run_at`.
    ///
    /// A queued job with the same [`Job::key`] is replaced.
    async fn enqueue(&self, job: Job, run_at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Remove and return up to `limit` jobs due at `now`, earliest first.
    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<Job>>;
}
