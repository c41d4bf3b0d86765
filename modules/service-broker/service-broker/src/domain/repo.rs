//! Repository traits for the service broker domain.

use async_trait::async_trait;
use service_broker_sdk::{ServiceBinding, ServiceInstance};
use uuid::Uuid;

/// Repository for service instances and their bindings.
///
/// Reads outside a transaction see committed state only. Every write to an
/// instance row goes through an [`InstanceTransaction`].
#[async_trait]
pub trait ServiceInstanceRepository: Send + Sync {
    /// Find an instance by guid.
    async fn find(&self, guid: Uuid) -> anyhow::Result<Option<ServiceInstance>>;

    /// Application bindings of an instance, oldest first.
    async fn app_bindings(&self, instance_guid: Uuid) -> anyhow::Result<Vec<ServiceBinding>>;

    /// Route bindings of an instance, oldest first.
    async fn route_bindings(&self, instance_guid: Uuid) -> anyhow::Result<Vec<ServiceBinding>>;

    /// Delete a binding record. Returns `false` when it was already gone.
    async fn delete_binding(&self, binding: &ServiceBinding) -> anyhow::Result<bool>;

    /// Open a transaction. Dropping it without [`InstanceTransaction::commit`]
    /// discards its writes.
    async fn begin(&self) -> anyhow::Result<Box<dyn InstanceTransaction>>;
}

/// Unit of work over instance rows with row-level locking.
///
/// The delete path always runs `lock_and_reload`, checks the reloaded state
/// and only then writes, so two concurrent deletions of the same instance
/// cannot both proceed.
#[async_trait]
pub trait InstanceTransaction: Send {
    /// Lock the instance row for the rest of the transaction and return its
    /// current state.
    async fn lock_and_reload(&mut self, guid: Uuid) -> anyhow::Result<Option<ServiceInstance>>;

    /// Persist the instance row together with its last operation.
    async fn save(&mut self, instance: &ServiceInstance) -> anyhow::Result<()>;

    /// Destroy the instance row and its last operation.
    ///
    /// Fails when bindings still reference the instance.
    async fn destroy(&mut self, guid: Uuid) -> anyhow::Result<()>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}
