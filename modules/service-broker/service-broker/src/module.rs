//! Wiring of the service broker module.

use std::sync::Arc;

use service_broker_sdk::ServiceInstancesApi;
use tracing::info;

use crate::config::ServiceBrokerConfig;
use crate::domain::error::DomainError;
use crate::domain::instance_deleter::InstanceDeleter;
use crate::domain::jobs::JobContext;
use crate::domain::ports::{BrokerClient, JobScheduler, ServiceEventRecorder};
use crate::domain::repo::ServiceInstanceRepository;
use crate::infra::broker::HttpBrokerClient;
use crate::infra::jobs::JobRunner;
use crate::local_client::ServiceBrokerLocalClient;

/// Adapters the module runs on.
#[derive(Clone)]
pub struct ServiceBrokerDeps {
    pub repo: Arc<dyn ServiceInstanceRepository>,
    pub broker: Arc<dyn BrokerClient>,
    pub events: Arc<dyn ServiceEventRecorder>,
    pub scheduler: Arc<dyn JobScheduler>,
}

/// Service broker module: the public API plus the background job runner.
pub struct ServiceBrokerModule {
    api: Arc<dyn ServiceInstancesApi>,
    runner: Arc<JobRunner>,
}

impl ServiceBrokerModule {
    #[must_use]
    pub fn new(config: ServiceBrokerConfig, deps: ServiceBrokerDeps) -> Self {
        let config = Arc::new(config);
        let deleter = Arc::new(InstanceDeleter::new(
            Arc::clone(&deps.repo),
            Arc::clone(&deps.broker),
            Arc::clone(&deps.events),
            Arc::clone(&deps.scheduler),
            Arc::clone(&config),
        ));
        let ctx = JobContext {
            repo: deps.repo,
            broker: deps.broker,
            events: deps.events,
            config,
        };

        info!("Service broker module initialized");
        Self {
            api: Arc::new(ServiceBrokerLocalClient::new(deleter)),
            runner: Arc::new(JobRunner::new(deps.scheduler, ctx)),
        }
    }

    /// Wire the module with the HTTP broker client.
    ///
    /// # Errors
    ///
    /// Returns `BrokerClient` when the HTTP client cannot be built.
    pub fn with_http_broker(
        config: ServiceBrokerConfig,
        repo: Arc<dyn ServiceInstanceRepository>,
        events: Arc<dyn ServiceEventRecorder>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Result<Self, DomainError> {
        let broker = HttpBrokerClient::new(&config.broker_client, config.broker_timeout)?;
        Ok(Self::new(
            config,
            ServiceBrokerDeps {
                repo,
                broker: Arc::new(broker),
                events,
                scheduler,
            },
        ))
    }

    #[must_use]
    pub fn api(&self) -> Arc<dyn ServiceInstancesApi> {
        Arc::clone(&self.api)
    }

    #[must_use]
    pub fn job_runner(&self) -> Arc<JobRunner> {
        Arc::clone(&self.runner)
    }
}
