//! Flows, their exception strategies, and the scope processors that open
//! nested executions.

pub mod construct;
pub mod handlers;
pub mod registry;
pub mod scopes;

pub use construct::{processor_fn, run_chain, FlowConstruct};
pub use handlers::{ContinueErrorHandler, PropagateErrorHandler};
pub use registry::{FlowRegistry, RegistryError};
pub use scopes::{FlowRef, TransactionalScope, TryScope};
