pub mod binding_deleter;
pub mod calls;
pub mod error;
pub mod instance_deleter;
pub mod jobs;
pub mod last_operation;
pub mod orphan_mitigator;
pub mod ports;
pub mod repo;
