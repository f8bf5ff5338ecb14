//! Resolves a transaction left bound by earlier work when the action starts afresh.

use std::sync::Arc;
use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::{Layer, Service};
use tracing::debug;

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::ExecutionError;
use crate::execution::transaction::{TransactionAction, TransactionConfig};

// ---------------------------------------------------------------------------
// ResolvePreviousTransactionLayer
// ---------------------------------------------------------------------------

/// Tower layer that resolves the bound transaction before running `next`
/// when the action is `None` or `AlwaysBegin`.
#[derive(Debug, Clone)]
pub struct ResolvePreviousTransactionLayer {
    config: Arc<TransactionConfig>,
}

impl ResolvePreviousTransactionLayer {
    #[must_use]
    pub fn new(config: Arc<TransactionConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for ResolvePreviousTransactionLayer {
    type Service = ResolvePreviousTransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResolvePreviousTransactionService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

// ---------------------------------------------------------------------------
// ResolvePreviousTransactionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ResolvePreviousTransactionService<S> {
    inner: S,
    config: Arc<TransactionConfig>,
}

impl<S> Service<Execution> for ResolvePreviousTransactionService<S>
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
            if matches!(action, TransactionAction::None | TransactionAction::AlwaysBegin)
                && scope.is_active()
            {
                debug!(?action, "resolving transaction carried from previous work");
                scope.resolve().await?;
            }
            inner.call(execution).await
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
    use crate::execution::TransactionScope;
    use crate::testing::ok_callback;

    async fn run(action: TransactionAction) -> Arc<LocalTransaction> {
        let scope = TransactionScope::new();
        let previous = Arc::new(LocalTransaction::new("previous", false));
        scope.bind(previous.clone()).unwrap();

        ResolvePreviousTransactionLayer::new(Arc::new(TransactionConfig::new(action)))
            .layer(ExecuteCallbackService)
            .oneshot(Execution::new(ok_callback(Event::new("x")), ExecutionContext::new(scope)))
            .await
            .unwrap();
        previous
    }

    #[tokio::test]
    async fn none_and_always_begin_resolve_previous() {
        assert_eq!(run(TransactionAction::None).await.status(), TransactionStatus::Committed);
        assert_eq!(
            run(TransactionAction::AlwaysBegin).await.status(),
            TransactionStatus::Committed
        );
    }

    #[tokio::test]
    async fn other_actions_leave_previous_alone() {
        for action in [
            TransactionAction::BeginOrJoin,
            TransactionAction::JoinIfPossible,
            TransactionAction::Indifferent,
        ] {
            assert_eq!(run(action).await.status(), TransactionStatus::Active);
        }
    }
}
