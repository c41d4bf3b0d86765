//! Service Broker SDK
//!
//! This crate provides the public API contract for the service broker module:
//! the models of service instances, bindings and their last operation, the
//! broker and deletion error types, and the `ServiceInstancesApi` trait.
//!
//! ## Usage
//!
//! ```ignore
//! use service_broker_sdk::{DeleteOptions, ServiceInstancesApi};
//!
//! let errors = client
//!     .delete_service_instances(&guids, DeleteOptions::default().accepts_incomplete(true))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod api;
pub mod error;
pub mod models;

pub use api::ServiceInstancesApi;

pub use error::{BrokerError, DeleteError, ServiceBrokerError};

pub use models::{
    BindingKind, DeleteOptions, InstanceKind, LastOperation, OperationState, OperationType,
    RequestAttrs, ServiceBinding, ServiceBroker, ServiceInstance, ServicePlan,
    UnknownOperationState,
};
