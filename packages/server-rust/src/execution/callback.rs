use std::fmt;
use std::future::Future;

use conveyor_core::Event;
use futures_util::future::BoxFuture;

use super::context::ExecutionContext;
use super::error::ExecutionError;

/// Outcome of an execution. `Ok(None)` means a filter dropped the message.
pub type ExecutionResult = Result<Option<Event>, ExecutionError>;

/// Boxed future produced by callbacks and interceptor services.
pub type ExecutionFuture = BoxFuture<'static, ExecutionResult>;

/// The work an execution template runs once its interceptors are set up.
pub struct ExecutionCallback(Box<dyn FnOnce(ExecutionContext) -> ExecutionFuture + Send>);

impl ExecutionCallback {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(ExecutionContext) -> Fut + Send + 'static,
        Fut: Future<Output = ExecutionResult> + Send + 'static,
    {
        Self(Box::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Consumes the callback and starts the work.
    #[must_use]
    pub fn run(self, ctx: ExecutionContext) -> ExecutionFuture {
        (self.0)(ctx)
    }
}

impl fmt::Debug for ExecutionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExecutionCallback")
    }
}

/// Request type flowing through the interceptor services.
#[derive(Debug)]
pub struct Execution {
    pub callback: ExecutionCallback,
    pub ctx: ExecutionContext,
}

impl Execution {
    #[must_use]
    pub fn new(callback: ExecutionCallback, ctx: ExecutionContext) -> Self {
        Self { callback, ctx }
    }
}
