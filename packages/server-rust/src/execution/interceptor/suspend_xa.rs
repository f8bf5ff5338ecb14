//! Suspends a bound XA transaction around work that must not take part in it.

use std::sync::Arc;
use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::{Layer, Service};
use tracing::warn;

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::ExecutionError;
use crate::execution::transaction::{TransactionAction, TransactionConfig};

// ---------------------------------------------------------------------------
// SuspendXaTransactionLayer
// ---------------------------------------------------------------------------

/// Tower layer that suspends a bound XA transaction for `NotSupported` and
/// `AlwaysBegin` actions and resumes it once `next` returns, on both the
/// success and the error path.
#[derive(Debug, Clone)]
pub struct SuspendXaTransactionLayer {
    config: Arc<TransactionConfig>,
}

impl SuspendXaTransactionLayer {
    #[must_use]
    pub fn new(config: Arc<TransactionConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for SuspendXaTransactionLayer {
    type Service = SuspendXaTransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SuspendXaTransactionService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

// ---------------------------------------------------------------------------
// SuspendXaTransactionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SuspendXaTransactionService<S> {
    inner: S,
    config: Arc<TransactionConfig>,
}

impl<S> Service<Execution> for SuspendXaTransactionService<S>
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
        let action = self.config.action;

        Box::pin(async move {
            let scope = execution.ctx.transactions().clone();
            let suspended =
                if matches!(action, TransactionAction::NotSupported | TransactionAction::AlwaysBegin) {
                    scope.suspend_xa().await?
                } else {
                    None
                };

            let result = inner.call(execution).await;

            let Some(tx) = suspended else {
                return result;
            };
            match (result, scope.resume_xa(tx).await) {
                (result, Ok(())) => result,
                (Ok(_), Err(err)) => Err(err.into()),
                (Err(original), Err(err)) => {
                    warn!(error = %err, "failed to resume xa transaction after error");
                    Err(original)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::execution::context::ExecutionContext;
    use crate::execution::interceptor::ExecuteCallbackService;
    use crate::execution::transaction::{LocalTransaction, Transaction, TransactionStatus};
    use crate::execution::{ExecutionCallback, TransactionScope};
    use crate::testing::failing_callback;

    fn service(action: TransactionAction) -> SuspendXaTransactionService<ExecuteCallbackService> {
        SuspendXaTransactionLayer::new(Arc::new(TransactionConfig::new(action)))
            .layer(ExecuteCallbackService)
    }

    #[tokio::test]
    async fn xa_is_suspended_during_next_and_resumed() {
        let scope = TransactionScope::new();
        let xa = Arc::new(LocalTransaction::new("xa", true));
        scope.bind(xa.clone()).unwrap();

        let observed = xa.clone();
        let callback = ExecutionCallback::new(move |ctx| async move {
            assert!(!ctx.transactions().is_active());
            assert_eq!(observed.status(), TransactionStatus::Suspended);
            Ok(None)
        });

        service(TransactionAction::NotSupported)
            .oneshot(Execution::new(callback, ExecutionContext::new(scope.clone())))
            .await
            .unwrap();

        assert_eq!(xa.status(), TransactionStatus::Active);
        assert_eq!(scope.transaction().unwrap().id(), "xa");
    }

    #[tokio::test]
    async fn resumed_on_error_path() {
        let scope = TransactionScope::new();
        let xa = Arc::new(LocalTransaction::new("xa", true));
        scope.bind(xa.clone()).unwrap();

        let err = service(TransactionAction::AlwaysBegin)
            .oneshot(Execution::new(failing_callback("boom"), ExecutionContext::new(scope.clone())))
            .await
            .unwrap_err();

        assert!(err.as_messaging().is_some());
        assert_eq!(xa.status(), TransactionStatus::Active);
        assert!(scope.is_active());
    }

    #[tokio::test]
    async fn non_xa_is_left_bound() {
        let scope = TransactionScope::new();
        scope.bind(Arc::new(LocalTransaction::new("local", false))).unwrap();

        let callback = ExecutionCallback::new(|ctx| async move {
            assert!(ctx.transactions().is_active());
            Ok(None)
        });
        service(TransactionAction::NotSupported)
            .oneshot(Execution::new(callback, ExecutionContext::new(scope)))
            .await
            .unwrap();
    }
}
