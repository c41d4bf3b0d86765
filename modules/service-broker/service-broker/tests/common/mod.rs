#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Shared fakes and fixtures for the service broker integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use service_broker::config::ServiceBrokerConfig;
use service_broker::domain::instance_deleter::InstanceDeleter;
use service_broker::domain::jobs::JobContext;
use service_broker::domain::ports::{
    BrokerClient, BrokerResponse, InstanceEventAction, LastOperationPoll, ServiceEventRecorder,
};
use service_broker::domain::repo::{InstanceTransaction, ServiceInstanceRepository};
use service_broker::infra::jobs::{InMemoryJobQueue, JobRunner};
use service_broker::infra::storage::InMemoryServiceInstanceRepository;
use service_broker::{
    BindingKind, BrokerError, InstanceKind, LastOperation, OperationState, OperationType,
    RequestAttrs, ServiceBinding, ServiceBroker, ServiceInstance, ServicePlan,
};
use uuid::Uuid;

// === Fake broker ===

/// Scripted answer of the fake broker.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Result<BrokerResponse, BrokerError>),
    /// Sleep this long, then answer `Completed`.
    Hang(Duration),
}

impl Reply {
    pub fn completed() -> Self {
        Self::Respond(Ok(BrokerResponse::Completed))
    }

    pub fn accepted(operation: &str) -> Self {
        Self::Respond(Ok(BrokerResponse::Accepted {
            operation: Some(operation.to_owned()),
        }))
    }

    pub fn status(status: u16) -> Self {
        Self::Respond(Err(bad_response(status)))
    }
}

pub fn bad_response(status: u16) -> BrokerError {
    BrokerError::BadResponse {
        method: "DELETE",
        uri: "https://broker.example.com/v2/service_instances".to_owned(),
        status,
        error: None,
        description: Some(format!("broker failed with {status}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Deprovision {
        instance_guid: Uuid,
        accepts_incomplete: bool,
    },
    Unbind {
        binding_guid: Uuid,
        accepts_incomplete: bool,
    },
    Poll {
        instance_guid: Uuid,
        operation: Option<String>,
    },
}

/// Broker double answering per guid. Unscripted calls succeed synchronously;
/// unscripted polls report `in progress`.
#[derive(Default)]
pub struct FakeBroker {
    deprovision: Mutex<HashMap<Uuid, Reply>>,
    unbind: Mutex<HashMap<Uuid, Reply>>,
    polls: Mutex<HashMap<Uuid, VecDeque<Result<LastOperationPoll, BrokerError>>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeBroker {
    pub fn on_deprovision(&self, instance_guid: Uuid, reply: Reply) {
        self.deprovision.lock().insert(instance_guid, reply);
    }

    pub fn on_unbind(&self, binding_guid: Uuid, reply: Reply) {
        self.unbind.lock().insert(binding_guid, reply);
    }

    pub fn on_poll(&self, instance_guid: Uuid, reply: Result<LastOperationPoll, BrokerError>) {
        self.polls
            .lock()
            .entry(instance_guid)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn deprovision_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Deprovision { .. }))
            .count()
    }

    pub fn unbind_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Unbind { .. }))
            .count()
    }

    async fn answer(reply: Option<Reply>) -> Result<BrokerResponse, BrokerError> {
        match reply.unwrap_or_else(Reply::completed) {
            Reply::Respond(result) => result,
            Reply::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Ok(BrokerResponse::Completed)
            }
        }
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    async fn deprovision(
        &self,
        instance: &ServiceInstance,
        _plan: &ServicePlan,
        accepts_incomplete: bool,
    ) -> Result<BrokerResponse, BrokerError> {
        self.calls.lock().push(Call::Deprovision {
            instance_guid: instance.guid,
            accepts_incomplete,
        });
        let reply = self.deprovision.lock().get(&instance.guid).cloned();
        Self::answer(reply).await
    }

    async fn unbind(
        &self,
        _instance: &ServiceInstance,
        _plan: &ServicePlan,
        binding: &ServiceBinding,
        accepts_incomplete: bool,
    ) -> Result<BrokerResponse, BrokerError> {
        self.calls.lock().push(Call::Unbind {
            binding_guid: binding.guid,
            accepts_incomplete,
        });
        let reply = self.unbind.lock().get(&binding.guid).cloned();
        Self::answer(reply).await
    }

    async fn fetch_last_operation(
        &self,
        instance: &ServiceInstance,
        _plan: &ServicePlan,
        operation: Option<&str>,
    ) -> Result<LastOperationPoll, BrokerError> {
        self.calls.lock().push(Call::Poll {
            instance_guid: instance.guid,
            operation: operation.map(ToOwned::to_owned),
        });
        self.polls
            .lock()
            .get_mut(&instance.guid)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(LastOperationPoll::State {
                state: OperationState::InProgress,
                description: None,
                retry_after: None,
            }))
    }
}

// === Recording event recorder ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Managed,
    UserProvided,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub family: EventFamily,
    pub action: InstanceEventAction,
    pub instance_guid: Uuid,
    pub request_attrs: RequestAttrs,
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, family: EventFamily) -> usize {
        self.events().iter().filter(|e| e.family == family).count()
    }

    fn push(
        &self,
        family: EventFamily,
        action: InstanceEventAction,
        instance: &ServiceInstance,
        request_attrs: &RequestAttrs,
    ) {
        self.events.lock().push(RecordedEvent {
            family,
            action,
            instance_guid: instance.guid,
            request_attrs: request_attrs.clone(),
        });
    }
}

#[async_trait]
impl ServiceEventRecorder for RecordingEvents {
    async fn record_service_instance_event(
        &self,
        action: InstanceEventAction,
        instance: &ServiceInstance,
        request_attrs: &RequestAttrs,
    ) -> anyhow::Result<()> {
        self.push(EventFamily::Managed, action, instance, request_attrs);
        Ok(())
    }

    async fn record_user_provided_service_instance_event(
        &self,
        action: InstanceEventAction,
        instance: &ServiceInstance,
        request_attrs: &RequestAttrs,
    ) -> anyhow::Result<()> {
        self.push(EventFamily::UserProvided, action, instance, request_attrs);
        Ok(())
    }
}

// === Repository whose destroy fails ===

/// Wraps the in-memory store; destroying the listed instances fails with
/// `message`.
pub struct FailingDestroyRepository {
    inner: InMemoryServiceInstanceRepository,
    failing: Vec<Uuid>,
    message: &'static str,
}

impl FailingDestroyRepository {
    pub fn new(
        inner: InMemoryServiceInstanceRepository,
        failing: Vec<Uuid>,
        message: &'static str,
    ) -> Self {
        Self {
            inner,
            failing,
            message,
        }
    }
}

struct FailingDestroyTransaction {
    inner: Box<dyn InstanceTransaction>,
    failing: Vec<Uuid>,
    message: &'static str,
}

#[async_trait]
impl ServiceInstanceRepository for FailingDestroyRepository {
    async fn find(&self, guid: Uuid) -> anyhow::Result<Option<ServiceInstance>> {
        self.inner.find(guid).await
    }

    async fn app_bindings(&self, guid: Uuid) -> anyhow::Result<Vec<ServiceBinding>> {
        self.inner.app_bindings(guid).await
    }

    async fn route_bindings(&self, guid: Uuid) -> anyhow::Result<Vec<ServiceBinding>> {
        self.inner.route_bindings(guid).await
    }

    async fn delete_binding(&self, binding: &ServiceBinding) -> anyhow::Result<bool> {
        self.inner.delete_binding(binding).await
    }

    async fn begin(&self) -> anyhow::Result<Box<dyn InstanceTransaction>> {
        Ok(Box::new(FailingDestroyTransaction {
            inner: self.inner.begin().await?,
            failing: self.failing.clone(),
            message: self.message,
        }))
    }
}

#[async_trait]
impl InstanceTransaction for FailingDestroyTransaction {
    async fn lock_and_reload(&mut self, guid: Uuid) -> anyhow::Result<Option<ServiceInstance>> {
        self.inner.lock_and_reload(guid).await
    }

    async fn save(&mut self, instance: &ServiceInstance) -> anyhow::Result<()> {
        self.inner.save(instance).await
    }

    async fn destroy(&mut self, guid: Uuid) -> anyhow::Result<()> {
        if self.failing.contains(&guid) {
            anyhow::bail!(self.message);
        }
        self.inner.destroy(guid).await
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.inner.commit().await
    }
}

// === Repository whose transactions fail to open ===

/// Wraps the in-memory store; the listed calls to `begin` (1-based, counted
/// across the wrapper's lifetime) fail with "connection reset".
pub struct FailingBeginRepository {
    inner: InMemoryServiceInstanceRepository,
    failing: Vec<usize>,
    begun: AtomicUsize,
}

impl FailingBeginRepository {
    pub fn new(inner: InMemoryServiceInstanceRepository, failing: Vec<usize>) -> Self {
        Self {
            inner,
            failing,
            begun: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ServiceInstanceRepository for FailingBeginRepository {
    async fn find(&self, guid: Uuid) -> anyhow::Result<Option<ServiceInstance>> {
        self.inner.find(guid).await
    }

    async fn app_bindings(&self, guid: Uuid) -> anyhow::Result<Vec<ServiceBinding>> {
        self.inner.app_bindings(guid).await
    }

    async fn route_bindings(&self, guid: Uuid) -> anyhow::Result<Vec<ServiceBinding>> {
        self.inner.route_bindings(guid).await
    }

    async fn delete_binding(&self, binding: &ServiceBinding) -> anyhow::Result<bool> {
        self.inner.delete_binding(binding).await
    }

    async fn begin(&self) -> anyhow::Result<Box<dyn InstanceTransaction>> {
        let call = self.begun.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.contains(&call) {
            anyhow::bail!("connection reset");
        }
        self.inner.begin().await
    }
}

// === Fixture ===

pub struct Harness {
    pub store: InMemoryServiceInstanceRepository,
    pub repo: Arc<dyn ServiceInstanceRepository>,
    pub broker: Arc<FakeBroker>,
    pub events: Arc<RecordingEvents>,
    pub queue: Arc<InMemoryJobQueue>,
    pub config: Arc<ServiceBrokerConfig>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ServiceBrokerConfig::default())
    }

    pub fn with_config(config: ServiceBrokerConfig) -> Self {
        let store = InMemoryServiceInstanceRepository::new();
        Self {
            repo: Arc::new(store.clone()),
            store,
            broker: Arc::new(FakeBroker::default()),
            events: Arc::new(RecordingEvents::default()),
            queue: Arc::new(InMemoryJobQueue::new()),
            config: Arc::new(config),
        }
    }

    /// Route every destroy of `failing` through an error with `message`.
    pub fn failing_destroy(mut self, failing: Vec<Uuid>, message: &'static str) -> Self {
        self.repo = Arc::new(FailingDestroyRepository::new(
            self.store.clone(),
            failing,
            message,
        ));
        self
    }

    /// Fail the listed calls to `begin` (1-based).
    pub fn failing_begin(mut self, failing: Vec<usize>) -> Self {
        self.repo = Arc::new(FailingBeginRepository::new(self.store.clone(), failing));
        self
    }

    pub fn deleter(&self) -> InstanceDeleter {
        InstanceDeleter::new(
            Arc::clone(&self.repo),
            self.broker.clone(),
            self.events.clone(),
            self.queue.clone(),
            Arc::clone(&self.config),
        )
    }

    pub fn job_context(&self) -> JobContext {
        JobContext {
            repo: Arc::clone(&self.repo),
            broker: self.broker.clone(),
            events: self.events.clone(),
            config: Arc::clone(&self.config),
        }
    }

    pub fn runner(&self) -> JobRunner {
        JobRunner::new(self.queue.clone(), self.job_context())
    }

    pub async fn add_managed(&self, name: &str) -> ServiceInstance {
        let instance = managed_instance(name);
        self.store.insert_instance(instance.clone()).await;
        instance
    }

    pub async fn add_user_provided(&self, name: &str) -> ServiceInstance {
        let instance = user_provided_instance(name);
        self.store.insert_instance(instance.clone()).await;
        instance
    }

    pub async fn add_app_binding(&self, instance: &ServiceInstance) -> ServiceBinding {
        let binding = binding(
            instance,
            BindingKind::App {
                app_guid: Uuid::new_v4(),
            },
        );
        self.store.insert_binding(binding.clone()).await.unwrap();
        binding
    }

    pub async fn add_route_binding(&self, instance: &ServiceInstance) -> ServiceBinding {
        let binding = binding(
            instance,
            BindingKind::Route {
                route_guid: Uuid::new_v4(),
            },
        );
        self.store.insert_binding(binding.clone()).await.unwrap();
        binding
    }

    pub async fn reload(&self, guid: Uuid) -> Option<ServiceInstance> {
        self.store.find(guid).await.unwrap()
    }

    pub async fn last_operation(&self, guid: Uuid) -> LastOperation {
        self.reload(guid)
            .await
            .and_then(|si| si.last_operation)
            .expect("instance with last operation")
    }
}

// === Builders ===

pub fn managed_instance(name: &str) -> ServiceInstance {
    ServiceInstance {
        guid: Uuid::new_v4(),
        name: name.to_owned(),
        space_guid: Uuid::new_v4(),
        kind: InstanceKind::Managed {
            plan: ServicePlan {
                guid: Uuid::new_v4(),
                name: "small".to_owned(),
                service_id: "service-id".to_owned(),
                plan_id: "plan-id".to_owned(),
                broker: ServiceBroker {
                    guid: Uuid::new_v4(),
                    name: "test-broker".to_owned(),
                    broker_url: url::Url::parse("https://broker.example.com").unwrap(),
                    auth_username: "admin".to_owned(),
                    auth_password: "secret".to_owned(),
                },
            },
        },
        last_operation: None,
    }
}

pub fn user_provided_instance(name: &str) -> ServiceInstance {
    ServiceInstance {
        guid: Uuid::new_v4(),
        name: name.to_owned(),
        space_guid: Uuid::new_v4(),
        kind: InstanceKind::UserProvided {
            credentials: serde_json::json!({ "password": "hunter2" }),
            syslog_drain_url: None,
            route_service_url: None,
        },
        last_operation: None,
    }
}

pub fn binding(instance: &ServiceInstance, kind: BindingKind) -> ServiceBinding {
    ServiceBinding {
        guid: Uuid::new_v4(),
        service_instance_guid: instance.guid,
        kind,
        credentials: serde_json::json!({}),
        created_at: Utc::now(),
    }
}

pub fn operation(operation_type: OperationType, state: OperationState) -> LastOperation {
    let now = Utc::now();
    LastOperation {
        operation_type,
        state,
        description: None,
        broker_operation: None,
        created_at: now,
        updated_at: now,
    }
}
