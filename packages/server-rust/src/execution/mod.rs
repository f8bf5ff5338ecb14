//! Execution templates and the interceptors they are assembled from.
//!
//! An execution runs one [`ExecutionCallback`] inside a stack of Tower
//! services, each handling a single concern: transaction demarcation,
//! isolation, exception routing, or turning handled exceptions into results.

pub mod callback;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod template;
pub mod transaction;

pub use callback::{Execution, ExecutionCallback, ExecutionFuture, ExecutionResult};
pub use context::ExecutionContext;
pub use error::{ExecutionError, TransactionError};
pub use template::{
    ErrorHandlingExecutionTemplate, ExecutionTemplate, TransactionalErrorHandlingExecutionTemplate,
    TransactionalExecutionTemplate,
};
pub use transaction::{
    ExternalTransactionAwareFactory, LocalTransaction, LocalTransactionFactory, Transaction,
    TransactionAction, TransactionConfig, TransactionFactory, TransactionScope, TransactionStatus,
};
