pub mod in_memory_queue;
pub mod runner;

pub use in_memory_queue::{InMemoryJobQueue, QueuedJob};
pub use runner::JobRunner;
