//! Innermost service of every execution stack: runs the callback itself.

use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::Service;

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::ExecutionError;

/// Service that invokes the execution's callback with its context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteCallbackService;

impl Service<Execution> for ExecuteCallbackService {
    type Response = Option<Event>;
    type Error = ExecutionError;
    type Future = ExecutionFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, execution: Execution) -> Self::Future {
        let Execution { callback, ctx } = execution;
        callback.run(ctx)
    }
}
