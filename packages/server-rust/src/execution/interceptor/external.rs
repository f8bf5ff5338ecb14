//! Joins a transaction managed outside this process.

use std::sync::Arc;
use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::{Layer, Service};
use tracing::debug;

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::ExecutionError;
use crate::execution::transaction::{TransactionAction, TransactionConfig, TransactionScope};

// ---------------------------------------------------------------------------
// ExternalTransactionLayer
// ---------------------------------------------------------------------------

/// Tower layer that joins the external transaction when the config interacts
/// with external transactions, its action is not `None`, no transaction is
/// bound, and the factory is external-transaction aware.
///
/// A joined transaction is unbound again once `next` returns or its future
/// is dropped.
#[derive(Debug, Clone)]
pub struct ExternalTransactionLayer {
    config: Arc<TransactionConfig>,
}

impl ExternalTransactionLayer {
    #[must_use]
    pub fn new(config: Arc<TransactionConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for ExternalTransactionLayer {
    type Service = ExternalTransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExternalTransactionService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

// ---------------------------------------------------------------------------
// ExternalTransactionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExternalTransactionService<S> {
    inner: S,
    config: Arc<TransactionConfig>,
}

impl<S> Service<Execution> for ExternalTransactionService<S>
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

        Box::pin(async move {
            let scope = execution.ctx.transactions().clone();
            let mut _unbind = None;

            if config.interact_with_external
                && config.action != TransactionAction::None
                && !scope.is_active()
            {
                if let Some(aware) = config.factory.as_deref().and_then(|f| f.as_external_aware()) {
                    if let Some(tx) = aware.join_external_transaction().await? {
                        debug!(tx = %tx.id(), "joined external transaction");
                        let id = tx.id().to_string();
                        scope.bind(tx)?;
                        _unbind = Some(UnbindOnDrop { scope: scope.clone(), id });
                    }
                }
            }

            inner.call(execution).await
        })
    }
}

/// Unbinds a joined external transaction, also when the call is cancelled.
struct UnbindOnDrop {
    scope: TransactionScope,
    id: String,
}

impl Drop for UnbindOnDrop {
    fn drop(&mut self) {
        if self.scope.unbind_if(&self.id).is_some() {
            debug!(tx = %self.id, "unbound external transaction");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::execution::context::ExecutionContext;
    use crate::execution::interceptor::ExecuteCallbackService;
    use crate::execution::transaction::{
        LocalTransaction, LocalTransactionFactory, Transaction, TransactionStatus,
    };
    use crate::execution::{ExecutionCallback, TransactionScope};

    fn external_config(external: Arc<LocalTransaction>) -> TransactionConfig {
        TransactionConfig::new(TransactionAction::JoinIfPossible)
            .with_factory(Arc::new(LocalTransactionFactory::new().with_external(external)))
            .interacting_with_external()
    }

    #[tokio::test]
    async fn joined_transaction_is_unbound_after_failure() {
        let external = Arc::new(LocalTransaction::new("ext", false));
        let scope = TransactionScope::new();

        let callback = ExecutionCallback::new(|ctx| async move {
            assert_eq!(ctx.transactions().transaction().unwrap().id(), "ext");
            Err(ExecutionError::Fatal(anyhow::anyhow!("next blew up")))
        });

        let result = ExternalTransactionLayer::new(Arc::new(external_config(external.clone())))
            .layer(ExecuteCallbackService)
            .oneshot(Execution::new(callback, ExecutionContext::new(scope.clone())))
            .await;

        assert!(result.is_err());
        assert!(!scope.is_active());
        // Unbinding never resolves the external transaction.
        assert_eq!(external.status(), TransactionStatus::Active);
    }

    #[tokio::test]
    async fn joined_transaction_is_unbound_after_success() {
        let external = Arc::new(LocalTransaction::new("ext", false));
        let scope = TransactionScope::new();

        let callback = ExecutionCallback::new(|ctx| async move {
            assert!(ctx.transactions().is_active());
            Ok(None)
        });
        ExternalTransactionLayer::new(Arc::new(external_config(external)))
            .layer(ExecuteCallbackService)
            .oneshot(Execution::new(callback, ExecutionContext::new(scope.clone())))
            .await
            .unwrap();

        assert!(!scope.is_active());
    }

    #[tokio::test]
    async fn joined_transaction_is_unbound_when_cancelled() {
        let external = Arc::new(LocalTransaction::new("ext", false));
        let scope = TransactionScope::new();

        let callback = ExecutionCallback::new(|ctx| async move {
            assert!(ctx.transactions().is_active());
            std::future::pending::<()>().await;
            Ok(None)
        });
        let call = ExternalTransactionLayer::new(Arc::new(external_config(external.clone())))
            .layer(ExecuteCallbackService)
            .oneshot(Execution::new(callback, ExecutionContext::new(scope.clone())));
        let timed_out = tokio::time::timeout(Duration::from_millis(20), call).await;

        assert!(timed_out.is_err());
        assert!(!scope.is_active());
        assert_eq!(external.status(), TransactionStatus::Active);
    }

    #[tokio::test]
    async fn skipped_without_external_interaction() {
        let external = Arc::new(LocalTransaction::new("ext", false));
        let mut config = external_config(external);
        config.interact_with_external = false;

        let callback = ExecutionCallback::new(|ctx| async move {
            assert!(!ctx.transactions().is_active());
            Ok(None)
        });
        ExternalTransactionLayer::new(Arc::new(config))
            .layer(ExecuteCallbackService)
            .oneshot(Execution::new(callback, ExecutionContext::default()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bound_local_transaction_wins() {
        let external = Arc::new(LocalTransaction::new("ext", false));
        let scope = TransactionScope::new();
        scope.bind(Arc::new(LocalTransaction::new("local", false))).unwrap();

        let callback = ExecutionCallback::new(|ctx| async move {
            assert_eq!(ctx.transactions().transaction().unwrap().id(), "local");
            Ok(None)
        });
        ExternalTransactionLayer::new(Arc::new(external_config(external)))
            .layer(ExecuteCallbackService)
            .oneshot(Execution::new(callback, ExecutionContext::new(scope.clone())))
            .await
            .unwrap();

        assert_eq!(scope.transaction().unwrap().id(), "local");
    }
}
