pub mod tracing_recorder;

pub use tracing_recorder::TracingEventRecorder;
