//! Service broker API trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{DeleteError, ServiceBrokerError};
use crate::models::DeleteOptions;

/// Public API exposed by the service broker module to other modules.
///
/// ```ignore
/// let errors = client
///     .delete_service_instances(&[guid], DeleteOptions::default())
///     .await?;
/// if errors.is_empty() {
///     // every instance and its bindings are gone
/// }
/// ```
#[async_trait]
pub trait ServiceInstancesApi: Send + Sync {
    /// Delete the given service instances together with their bindings.
    ///
    /// Guids that no longer resolve to an instance are skipped. The returned
    /// list holds one entry per binding or instance that could not be deleted,
    /// in the order they were encountered; an empty list means everything was
    /// deleted (or handed over to the broker asynchronously).
    ///
    /// # Errors
    /// `ServiceBrokerError::BrokerTimeout` when a broker call timed out and the
    /// batch was aborted; deletions completed before the timeout are kept.
    async fn delete_service_instances(
        &self,
        guids: &[Uuid],
        options: DeleteOptions,
    ) -> Result<Vec<DeleteError>, ServiceBrokerError>;
}
