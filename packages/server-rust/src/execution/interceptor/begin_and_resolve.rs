//! Begins a transaction according to the configured action and resolves it.

use std::sync::Arc;
use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::{ExecutionError, TransactionError};
use crate::execution::transaction::{TransactionAction, TransactionConfig};

// ---------------------------------------------------------------------------
// BeginAndResolveTransactionLayer
// ---------------------------------------------------------------------------

/// Tower layer that begins a transaction for `AlwaysBegin`, or for
/// `BeginOrJoin` when none is bound, and resolves it afterwards.
///
/// - On success the transaction is resolved if this layer began it, or if
///   `resolve_any_transaction` is set.
/// - On a messaging exception it is resolved only with
///   `process_on_exception`; an unhandled exception marks it rollback-only
///   first.
/// - On a fatal error a transaction begun here is rolled back.
#[derive(Debug, Clone)]
pub struct BeginAndResolveTransactionLayer {
    config: Arc<TransactionConfig>,
    process_on_exception: bool,
    resolve_any_transaction: bool,
}

impl BeginAndResolveTransactionLayer {
    #[must_use]
    pub fn new(
        config: Arc<TransactionConfig>,
        process_on_exception: bool,
        resolve_any_transaction: bool,
    ) -> Self {
        Self {
            config,
            process_on_exception,
            resolve_any_transaction,
        }
    }
}

impl<S> Layer<S> for BeginAndResolveTransactionLayer {
    type Service = BeginAndResolveTransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BeginAndResolveTransactionService {
            inner,
            config: Arc::clone(&self.config),
            process_on_exception: self.process_on_exception,
            resolve_any_transaction: self.resolve_any_transaction,
        }
    }
}

// ---------------------------------------------------------------------------
// BeginAndResolveTransactionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BeginAndResolveTransactionService<S> {
    inner: S,
    config: Arc<TransactionConfig>,
    process_on_exception: bool,
    resolve_any_transaction: bool,
}

impl<S> Service<Execution> for BeginAndResolveTransactionService<S>
where
    S: Service<Execution, Response = Option<Event>, Error = ExecutionError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Option<Event>;
    type Error = ExecutionError;
    type Future = ExecutionFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, execution: Execution) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = Arc::clone(&self.config);
        let process_on_exception = self.process_on_exception;
        let resolve_any = self.resolve_any_transaction;
        let ctx = execution.ctx.clone();

        Box::pin(async move {
            let scope = ctx.transactions().clone();
            let begin = match config.action {
                TransactionAction::AlwaysBegin => true,
                TransactionAction::BeginOrJoin => !scope.is_active(),
                _ => false,
            };

            if begin {
                let factory = config
                    .factory
                    .as_ref()
                    .ok_or(TransactionError::MissingFactory(config.action))?;
                let tx = factory.begin_transaction(config.timeout).await?;
                debug!(tx = %tx.id(), action = ?config.action, "began transaction");
                scope.bind(tx)?;
                ctx.mark_transaction_start();
            }

            let should_resolve = begin || resolve_any;
            match inner.call(execution).await {
                Ok(result) => {
                    if should_resolve {
                        scope.resolve().await?;
                    }
                    Ok(result)
                }
                Err(ExecutionError::Messaging(exception)) => {
                    if process_on_exception {
                        if !exception.handled() {
                            if let Some(tx) = scope.transaction() {
                                debug!(tx = %tx.id(), "unhandled exception, marking rollback-only");
                                tx.set_rollback_only();
                            }
                        }
                        if should_resolve {
                            if let Err(err) = scope.resolve().await {
                                warn!(error = %err, "failed to resolve transaction after exception");
                            }
                        }
                    }
                    Err(exception.into())
                }
                Err(fatal) => {
                    if begin {
                        if let Some(tx) = scope.transaction() {
                            tx.set_rollback_only();
                        }
                        if let Err(err) = scope.resolve().await {
                            warn!(error = %err, "failed to roll back transaction after fatal error");
                        }
                    }
                    Err(fatal)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
