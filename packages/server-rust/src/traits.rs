//! Extension points implemented by flows, exception strategies, and hosts.

use async_trait::async_trait;
use conveyor_core::{Event, MessagingException};
use futures_util::future::BoxFuture;
use tracing::error;

use crate::execution::{ExecutionContext, ExecutionResult};
use crate::processing::error::{PhaseError, WorkRejected};

/// A step of a flow.
///
/// Returning `Ok(None)` filters the message: nothing downstream runs and the
/// flow produces no result.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult;
}

/// Exception strategy of a flow.
///
/// Receives the exception raised while routing and returns the event to
/// carry forward. Marking the exception handled turns the failure into an
/// ordinary result once the execution template unwinds; leaving it unhandled
/// propagates it to the caller. An `Err` means the strategy itself failed.
#[async_trait]
pub trait MessagingExceptionHandler: Send + Sync {
    async fn handle_exception(
        &self,
        exception: &mut MessagingException,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Event>;
}

/// Last resort for failures no flow can handle.
pub trait SystemExceptionHandler: Send + Sync {
    fn handle_exception(&self, error: &PhaseError);
}

/// Default [`SystemExceptionHandler`]: logs and moves on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSystemExceptionHandler;

impl SystemExceptionHandler for LoggingSystemExceptionHandler {
    fn handle_exception(&self, err: &PhaseError) {
        error!(error = %err, "unhandled system exception");
    }
}

/// Unit of asynchronous work handed to a [`WorkExecutor`].
pub type Work = BoxFuture<'static, ()>;

/// Runs phase work off the caller's task.
pub trait WorkExecutor: Send + Sync {
    /// Accepts `work` for execution without waiting for it to run.
    ///
    /// # Errors
    ///
    /// Returns [`WorkRejected`] if the executor cannot take more work.
    fn schedule_work(&self, work: Work) -> Result<(), WorkRejected>;
}
