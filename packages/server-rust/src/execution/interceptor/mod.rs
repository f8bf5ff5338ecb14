//! Execution interceptors, one cross-cutting concern per Tower layer.
//!
//! Every layer wraps a `Service<Execution>` and produces another one, so any
//! interceptor can be tested in isolation around [`ExecuteCallbackService`].

pub mod begin_and_resolve;
pub mod commit;
pub mod execute_callback;
pub mod external;
pub mod handle_exception;
pub mod isolate;
pub mod resolve_previous;
pub mod rethrow;
pub mod suspend_xa;
pub mod validate;

pub use begin_and_resolve::{BeginAndResolveTransactionLayer, BeginAndResolveTransactionService};
pub use commit::{CommitTransactionLayer, CommitTransactionService};
pub use execute_callback::ExecuteCallbackService;
pub use external::{ExternalTransactionLayer, ExternalTransactionService};
pub use handle_exception::{HandleExceptionLayer, HandleExceptionService};
pub use isolate::{IsolateCurrentTransactionLayer, IsolateCurrentTransactionService};
pub use resolve_previous::{ResolvePreviousTransactionLayer, ResolvePreviousTransactionService};
pub use rethrow::{RethrowExceptionLayer, RethrowExceptionService};
pub use suspend_xa::{SuspendXaTransactionLayer, SuspendXaTransactionService};
pub use validate::{ValidateTransactionalStateLayer, ValidateTransactionalStateService};
