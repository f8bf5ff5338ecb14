//! Resolves the transaction begun by this execution once the callback succeeds.

use std::task::{Context, Poll};

use conveyor_core::{Event, MessagingException};
use tower::{Layer, Service};
use tracing::debug;

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::ExecutionError;

// ---------------------------------------------------------------------------
// CommitTransactionLayer
// ---------------------------------------------------------------------------

/// Tower layer that resolves the transaction after a successful callback
/// when the execution context says this execution began it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitTransactionLayer;

impl<S> Layer<S> for CommitTransactionLayer {
    type Service = CommitTransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CommitTransactionService { inner }
    }
}

// ---------------------------------------------------------------------------
// CommitTransactionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommitTransactionService<S> {
    inner: S,
}

impl<S> Service<Execution> for CommitTransactionService<S>
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
        let ctx = execution.ctx.clone();

        Box::pin(async move {
            let result = inner.call(execution).await?;
            if !ctx.needs_transaction_resolution() {
                return Ok(result);
            }

            debug!("resolving transaction begun by this execution");
            if let Err(err) = ctx.transactions().resolve().await {
                // A filter may have dropped the message; fall back to the
                // last event a processor saw.
                return Err(match result.clone().or_else(|| ctx.current_event()) {
                    Some(event) => MessagingException::new(
                        format!("failed to resolve transaction: {err}"),
                        event,
                    )
                    .with_cause(err)
                    .into(),
                    None => err.into(),
                });
            }
            Ok::<_, ExecutionError>(result)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tower::ServiceExt;

    use super::*;
    use crate::execution::context::ExecutionContext;
    use crate::execution::interceptor::ExecuteCallbackService;
    use crate::execution::transaction::{LocalTransaction, Transaction, TransactionStatus};
    use crate::execution::{ExecutionCallback, TransactionScope};
    use crate::testing::ok_callback;

    fn service() -> CommitTransactionService<ExecuteCallbackService> {
        CommitTransactionLayer.layer(ExecuteCallbackService)
    }

    #[tokio::test]
    async fn no_resolution_needed_leaves_transaction_alone() {
        let scope = TransactionScope::new();
        let tx = Arc::new(LocalTransaction::new("t", false));
        scope.bind(tx.clone()).unwrap();
        let event = Event::new("in");

        let result = service()
            .oneshot(Execution::new(ok_callback(event.clone()), ExecutionContext::new(scope.clone())))
            .await
            .unwrap();

        assert_eq!(result, Some(event));
        assert_eq!(tx.status(), TransactionStatus::Active);
        assert!(scope.is_active());
    }

    #[tokio::test]
    async fn commits_when_execution_began_transaction() {
        let scope = TransactionScope::new();
        let tx = Arc::new(LocalTransaction::new("t", false));
        scope.bind(tx.clone()).unwrap();
        let ctx = ExecutionContext::new(scope.clone());
        ctx.mark_transaction_start();

        service()
            .oneshot(Execution::new(ok_callback(Event::new("in")), ctx))
            .await
            .unwrap();

        assert_eq!(tx.status(), TransactionStatus::Committed);
        assert!(!scope.is_active());
    }

    #[tokio::test]
    async fn resolve_failure_after_filter_uses_current_event() {
        let scope = TransactionScope::new();
        let tx = Arc::new(LocalTransaction::new("t", false));
        scope.bind(tx.clone()).unwrap();
        // Committing an already committed transaction fails.
        tx.commit().await.unwrap();

        let ctx = ExecutionContext::new(scope);
        ctx.mark_transaction_start();
        let seen = Event::new("last seen");
        ctx.set_current_event(seen.clone());

        let callback = ExecutionCallback::new(|_ctx| async { Ok(None) });
        let err = service()
            .oneshot(Execution::new(callback, ctx))
            .await
            .unwrap_err();

        let exception = err.as_messaging().expect("messaging exception");
        assert_eq!(exception.event(), &seen);
        assert!(exception.message().contains("failed to resolve transaction"));
    }
}
