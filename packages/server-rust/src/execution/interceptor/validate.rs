//! Fails fast when the bound transaction contradicts the configured action.

use std::sync::Arc;
use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::{Layer, Service};
use tracing::warn;

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::{ExecutionError, TransactionError};
use crate::execution::transaction::{TransactionAction, TransactionConfig};

// ---------------------------------------------------------------------------
// ValidateTransactionalStateLayer
// ---------------------------------------------------------------------------

/// Tower layer that rejects, before `next` runs:
/// - `Never` while a transaction is bound,
/// - `AlwaysJoin` while none is bound,
/// - `AlwaysBegin` while one is bound and the config demands strict isolation.
#[derive(Debug, Clone)]
pub struct ValidateTransactionalStateLayer {
    config: Arc<TransactionConfig>,
}

impl ValidateTransactionalStateLayer {
    #[must_use]
    pub fn new(config: Arc<TransactionConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for ValidateTransactionalStateLayer {
    type Service = ValidateTransactionalStateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidateTransactionalStateService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Returns the violation message, if `config` cannot run with the given state.
fn violation(config: &TransactionConfig, bound: bool) -> Option<&'static str> {
    match config.action {
        TransactionAction::Never if bound => {
            Some("transaction action is Never but a transaction is active")
        }
        TransactionAction::AlwaysJoin if !bound => {
            Some("transaction action is AlwaysJoin but no transaction is active")
        }
        TransactionAction::AlwaysBegin if bound && config.strict_isolation => Some(
            "transaction action is AlwaysBegin with strict isolation but a transaction is active",
        ),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// ValidateTransactionalStateService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ValidateTransactionalStateService<S> {
    inner: S,
    config: Arc<TransactionConfig>,
}

impl<S> Service<Execution> for ValidateTransactionalStateService<S>
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
        if let Some(reason) = violation(&self.config, execution.ctx.transactions().is_active()) {
            warn!(action = ?self.config.action, reason, "rejecting execution");
            let err = ExecutionError::Transaction(TransactionError::IllegalState(reason.to_string()));
            return Box::pin(async move { Err::<Option<Event>, _>(err) });
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(execution).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
