//! Conveyor Server: phased message processing, execution interceptors, and
//! transaction demarcation.

pub mod execution;
pub mod flow;
pub mod logging;
pub mod processing;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use execution::{ExecutionContext, ExecutionError, ExecutionTemplate};
pub use processing::{MessageProcessContext, MessageProcessTemplate, MessageProcessingManager};
pub use traits::{EventProcessor, MessagingExceptionHandler, SystemExceptionHandler, WorkExecutor};
