//! Outermost service: turns handled exceptions into ordinary results.

use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::{Layer, Service};
use tracing::debug;

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::ExecutionError;

// ---------------------------------------------------------------------------
// RethrowExceptionLayer
// ---------------------------------------------------------------------------

/// Tower layer that returns the recovery event of a handled
/// [`ExecutionError::Messaging`] instead of propagating it. Unhandled and
/// fatal errors pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct RethrowExceptionLayer;

impl<S> Layer<S> for RethrowExceptionLayer {
    type Service = RethrowExceptionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RethrowExceptionService { inner }
    }
}

// ---------------------------------------------------------------------------
// RethrowExceptionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RethrowExceptionService<S> {
    inner: S,
}

impl<S> Service<Execution> for RethrowExceptionService<S>
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

        Box::pin(async move {
            match inner.call(execution).await {
                Err(ExecutionError::Messaging(exception)) if exception.handled() => {
                    debug!(error = %exception, "exception handled, returning recovery event");
                    Ok(Some(exception.into_event()))
                }
                other => other,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
