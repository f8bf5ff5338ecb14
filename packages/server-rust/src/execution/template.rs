//! Execution templates: pre-assembled interceptor stacks.
//!
//! Each template composes its layers once with [`ServiceBuilder`] and clones
//! the finished stack for every call. Stacks are listed outermost first.

use std::sync::Arc;

use async_trait::async_trait;
use tower::{ServiceBuilder, ServiceExt};

use super::callback::{Execution, ExecutionCallback, ExecutionResult};
use super::context::ExecutionContext;
use super::interceptor::{
    BeginAndResolveTransactionLayer, BeginAndResolveTransactionService, CommitTransactionLayer,
    CommitTransactionService, ExecuteCallbackService, ExternalTransactionLayer,
    ExternalTransactionService, HandleExceptionLayer, HandleExceptionService,
    IsolateCurrentTransactionLayer, IsolateCurrentTransactionService,
    ResolvePreviousTransactionLayer, ResolvePreviousTransactionService, RethrowExceptionLayer,
    RethrowExceptionService, SuspendXaTransactionLayer, SuspendXaTransactionService,
    ValidateTransactionalStateLayer, ValidateTransactionalStateService,
};
use super::transaction::{TransactionAction, TransactionConfig, TransactionScope};
use crate::traits::MessagingExceptionHandler;

// ---------------------------------------------------------------------------
// ExecutionTemplate trait
// ---------------------------------------------------------------------------

/// A reusable interceptor stack exposed as a single entry point.
#[async_trait]
pub trait ExecutionTemplate: Send + Sync {
    /// Runs `callback` with a fresh [`ExecutionContext`] over `scope`, the
    /// transaction scope of the message being processed.
    async fn execute_in_scope(
        &self,
        scope: &TransactionScope,
        callback: ExecutionCallback,
    ) -> ExecutionResult;

    /// Runs `callback` in a new, empty transaction scope.
    async fn execute(&self, callback: ExecutionCallback) -> ExecutionResult {
        let scope = TransactionScope::new();
        self.execute_in_scope(&scope, callback).await
    }
}

// ---------------------------------------------------------------------------
// TransactionalErrorHandlingExecutionTemplate
// ---------------------------------------------------------------------------

type TransactionalErrorHandlingStack = RethrowExceptionService<
    ExternalTransactionService<
        IsolateCurrentTransactionService<
            ValidateTransactionalStateService<
                SuspendXaTransactionService<
                    ResolvePreviousTransactionService<
                        BeginAndResolveTransactionService<
                            HandleExceptionService<CommitTransactionService<ExecuteCallbackService>>,
                        >,
                    >,
                >,
            >,
        >,
    >,
>;

/// The complete stack, entered when a message starts flowing through a flow
/// and when a flow is invoked by reference:
///
/// 1. `RethrowExceptionLayer`
/// 2. `ExternalTransactionLayer`
/// 3. `IsolateCurrentTransactionLayer`
/// 4. `ValidateTransactionalStateLayer`
/// 5. `SuspendXaTransactionLayer`
/// 6. `ResolvePreviousTransactionLayer`
/// 7. `BeginAndResolveTransactionLayer`
/// 8. `HandleExceptionLayer`
/// 9. `CommitTransactionLayer`
/// 10. `ExecuteCallbackService`
#[derive(Clone)]
pub struct TransactionalErrorHandlingExecutionTemplate {
    stack: TransactionalErrorHandlingStack,
}

impl TransactionalErrorHandlingExecutionTemplate {
    /// Template for the top of a flow. Resolves any transaction left bound
    /// when the execution completes.
    #[must_use]
    pub fn create_main_execution_template(
        config: TransactionConfig,
        handler: Arc<dyn MessagingExceptionHandler>,
    ) -> Self {
        Self::build(config, handler, true)
    }

    /// Template for a nested scope. Only resolves transactions it began.
    #[must_use]
    pub fn create_scope_execution_template(
        config: TransactionConfig,
        handler: Arc<dyn MessagingExceptionHandler>,
    ) -> Self {
        Self::build(config, handler, false)
    }

    fn build(
        config: TransactionConfig,
        handler: Arc<dyn MessagingExceptionHandler>,
        resolve_any_transaction: bool,
    ) -> Self {
        let config = Arc::new(config);
        let stack = ServiceBuilder::new()
            .layer(RethrowExceptionLayer)
            .layer(ExternalTransactionLayer::new(Arc::clone(&config)))
            .layer(IsolateCurrentTransactionLayer::new(Arc::clone(&config)))
            .layer(ValidateTransactionalStateLayer::new(Arc::clone(&config)))
            .layer(SuspendXaTransactionLayer::new(Arc::clone(&config)))
            .layer(ResolvePreviousTransactionLayer::new(Arc::clone(&config)))
            .layer(BeginAndResolveTransactionLayer::new(
                config,
                false,
                resolve_any_transaction,
            ))
            .layer(HandleExceptionLayer::new(handler))
            .layer(CommitTransactionLayer)
            .service(ExecuteCallbackService);
        Self { stack }
    }
}

#[async_trait]
impl ExecutionTemplate for TransactionalErrorHandlingExecutionTemplate {
    async fn execute_in_scope(
        &self,
        scope: &TransactionScope,
        callback: ExecutionCallback,
    ) -> ExecutionResult {
        let ctx = ExecutionContext::new(scope.clone());
        self.stack.clone().oneshot(Execution::new(callback, ctx)).await
    }
}

// ---------------------------------------------------------------------------
// ErrorHandlingExecutionTemplate
// ---------------------------------------------------------------------------

type ErrorHandlingStack = RethrowExceptionService<
    SuspendXaTransactionService<
        BeginAndResolveTransactionService<
            BeginAndResolveTransactionService<
                HandleExceptionService<CommitTransactionService<ExecuteCallbackService>>,
            >,
        >,
    >,
>;

/// Error routing without the full transactional stack. Runs with an
/// `Indifferent` transaction config:
///
/// 1. `RethrowExceptionLayer`
/// 2. `SuspendXaTransactionLayer`
/// 3. `BeginAndResolveTransactionLayer`
/// 4. `BeginAndResolveTransactionLayer`
/// 5. `HandleExceptionLayer`
/// 6. `CommitTransactionLayer`
/// 7. `ExecuteCallbackService`
///
/// The repeated begin-and-resolve layer never begins a transaction under an
/// `Indifferent` action and resolves nothing it did not begin, so the second
/// copy is inert.
#[derive(Clone)]
pub struct ErrorHandlingExecutionTemplate {
    stack: ErrorHandlingStack,
}

impl ErrorHandlingExecutionTemplate {
    #[must_use]
    pub fn create_error_handling_execution_template(
        handler: Arc<dyn MessagingExceptionHandler>,
    ) -> Self {
        let config = Arc::new(TransactionConfig::new(TransactionAction::Indifferent));
        let stack = ServiceBuilder::new()
            .layer(RethrowExceptionLayer)
            .layer(SuspendXaTransactionLayer::new(Arc::clone(&config)))
            .layer(BeginAndResolveTransactionLayer::new(Arc::clone(&config), true, false))
            .layer(BeginAndResolveTransactionLayer::new(config, true, false))
            .layer(HandleExceptionLayer::new(handler))
            .layer(CommitTransactionLayer)
            .service(ExecuteCallbackService);
        Self { stack }
    }
}

#[async_trait]
impl ExecutionTemplate for ErrorHandlingExecutionTemplate {
    async fn execute_in_scope(
        &self,
        scope: &TransactionScope,
        callback: ExecutionCallback,
    ) -> ExecutionResult {
        let ctx = ExecutionContext::new(scope.clone());
        self.stack.clone().oneshot(Execution::new(callback, ctx)).await
    }
}

// ---------------------------------------------------------------------------
// TransactionalExecutionTemplate
// ---------------------------------------------------------------------------

type TransactionalStack = ExternalTransactionService<
    IsolateCurrentTransactionService<
        ValidateTransactionalStateService<
            SuspendXaTransactionService<
                ResolvePreviousTransactionService<
                    BeginAndResolveTransactionService<ExecuteCallbackService>,
                >,
            >,
        >,
    >,
>;

/// Transactional behaviour without exception handling, for a single
/// downstream processor whose enclosing template already routes errors:
///
/// 1. `ExternalTransactionLayer`
/// 2. `IsolateCurrentTransactionLayer`
/// 3. `ValidateTransactionalStateLayer`
/// 4. `SuspendXaTransactionLayer`
/// 5. `ResolvePreviousTransactionLayer`
/// 6. `BeginAndResolveTransactionLayer`
/// 7. `ExecuteCallbackService`
#[derive(Clone)]
pub struct TransactionalExecutionTemplate {
    stack: TransactionalStack,
}

impl TransactionalExecutionTemplate {
    #[must_use]
    pub fn create_transactional_execution_template(config: TransactionConfig) -> Self {
        let config = Arc::new(config);
        let stack = ServiceBuilder::new()
            .layer(ExternalTransactionLayer::new(Arc::clone(&config)))
            .layer(IsolateCurrentTransactionLayer::new(Arc::clone(&config)))
            .layer(ValidateTransactionalStateLayer::new(Arc::clone(&config)))
            .layer(SuspendXaTransactionLayer::new(Arc::clone(&config)))
            .layer(ResolvePreviousTransactionLayer::new(Arc::clone(&config)))
            .layer(BeginAndResolveTransactionLayer::new(config, true, false))
            .service(ExecuteCallbackService);
        Self { stack }
    }
}

#[async_trait]
impl ExecutionTemplate for TransactionalExecutionTemplate {
    async fn execute_in_scope(
        &self,
        scope: &TransactionScope,
        callback: ExecutionCallback,
    ) -> ExecutionResult {
        let ctx = ExecutionContext::new(scope.clone());
        self.stack.clone().oneshot(Execution::new(callback, ctx)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
