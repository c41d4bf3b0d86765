//! Local client adapter implementing the SDK API trait.

use std::sync::Arc;

use async_trait::async_trait;
use service_broker_sdk::{DeleteError, DeleteOptions, ServiceBrokerError, ServiceInstancesApi};
use uuid::Uuid;

use crate::domain::instance_deleter::InstanceDeleter;

/// In-process implementation of [`ServiceInstancesApi`].
pub struct ServiceBrokerLocalClient {
    deleter: Arc<InstanceDeleter>,
}

impl ServiceBrokerLocalClient {
    #[must_use]
    pub fn new(deleter: Arc<InstanceDeleter>) -> Self {
        Self { deleter }
    }
}

#[async_trait]
impl ServiceInstancesApi for ServiceBrokerLocalClient {
    async fn delete_service_instances(
        &self,
        guids: &[Uuid],
        options: DeleteOptions,
    ) -> Result<Vec<DeleteError>, ServiceBrokerError> {
        self.deleter
            .delete(guids, &options)
            .await
            .map_err(Into::into)
    }
}
