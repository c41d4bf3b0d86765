//! Service Broker Module Implementation
//!
//! Deletes service instances and their bindings through the Open Service
//! Broker API and tracks asynchronous broker operations until they finish.
//!
//! ## Architecture
//!
//! ```text
//!   ServiceInstancesApi (local client)
//!                │
//!                ▼
//!        InstanceDeleter ──► BindingDeleter ──► BrokerClient
//!                │                 │
//!                │                 └──► OrphanMitigator ──► JobScheduler
//!                ▼
//!   JobScheduler ◄── JobRunner ──► Job::run (state fetch, orphan cleanup)
//! ```
//!
//! The public API is defined in `service-broker-sdk` and re-exported here.

// === PUBLIC API (from SDK) ===
pub use service_broker_sdk::{
    BindingKind, BrokerError, DeleteError, DeleteOptions, InstanceKind, LastOperation,
    OperationState, OperationType, RequestAttrs, ServiceBinding, ServiceBroker,
    ServiceBrokerError, ServiceInstance, ServiceInstancesApi, ServicePlan,
};

// === MODULE DEFINITION ===
pub mod module;
pub use module::{ServiceBrokerDeps, ServiceBrokerModule};

// === LOCAL CLIENT ===
pub mod local_client;

// === INTERNAL MODULES ===
pub mod config;
pub mod domain;
pub mod infra;
