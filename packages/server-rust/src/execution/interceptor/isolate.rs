//! Detaches the bound transaction around work that must run outside it.

use std::sync::Arc;
use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::{Layer, Service};

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::ExecutionError;
use crate::execution::transaction::{TransactionAction, TransactionConfig};

// ---------------------------------------------------------------------------
// IsolateCurrentTransactionLayer
// ---------------------------------------------------------------------------

/// Tower layer that, for `NotSupported`, detaches the bound transaction while
/// `next` runs and restores it whatever the outcome.
#[derive(Debug, Clone)]
pub struct IsolateCurrentTransactionLayer {
    config: Arc<TransactionConfig>,
}

impl IsolateCurrentTransactionLayer {
    #[must_use]
    pub fn new(config: Arc<TransactionConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for IsolateCurrentTransactionLayer {
    type Service = IsolateCurrentTransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IsolateCurrentTransactionService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

// ---------------------------------------------------------------------------
// IsolateCurrentTransactionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IsolateCurrentTransactionService<S> {
    inner: S,
    config: Arc<TransactionConfig>,
}

impl<S> Service<Execution> for IsolateCurrentTransactionService<S>
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
        let isolate = self.config.action == TransactionAction::NotSupported;

        Box::pin(async move {
            if !isolate {
                return inner.call(execution).await;
            }
            let scope = execution.ctx.transactions().clone();
            let isolated = scope.isolate();
            let result = inner.call(execution).await;
            scope.restore(isolated);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
