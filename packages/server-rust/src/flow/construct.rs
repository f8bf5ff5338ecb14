//! Flows: named processor chains with an exception strategy.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::Event;
use tracing::{debug, trace};

use super::handlers::PropagateErrorHandler;
use crate::execution::{ExecutionContext, ExecutionError, ExecutionResult};
use crate::traits::{EventProcessor, MessagingExceptionHandler};

// ---------------------------------------------------------------------------
// FlowConstruct
// ---------------------------------------------------------------------------

/// A named chain of processors plus the exception strategy applied to
/// failures raised while routing through it.
pub struct FlowConstruct {
    name: String,
    processors: Vec<Arc<dyn EventProcessor>>,
    exception_handler: Arc<dyn MessagingExceptionHandler>,
}

impl FlowConstruct {
    /// Creates a flow with the default strategy, [`PropagateErrorHandler`].
    #[must_use]
    pub fn new(name: impl Into<String>, processors: Vec<Arc<dyn EventProcessor>>) -> Self {
        Self {
            name: name.into(),
            processors,
            exception_handler: Arc::new(PropagateErrorHandler::default()),
        }
    }

    #[must_use]
    pub fn with_exception_handler(mut self, handler: Arc<dyn MessagingExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn processors(&self) -> &[Arc<dyn EventProcessor>] {
        &self.processors
    }

    #[must_use]
    pub fn exception_handler(&self) -> Arc<dyn MessagingExceptionHandler> {
        Arc::clone(&self.exception_handler)
    }
}

impl fmt::Debug for FlowConstruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowConstruct")
            .field("name", &self.name)
            .field(
                "processors",
                &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventProcessor for FlowConstruct {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult {
        trace!(flow = %self.name, "routing event through flow");
        run_chain(&self.processors, event, ctx).await
    }
}

// ---------------------------------------------------------------------------
// Chain execution
// ---------------------------------------------------------------------------

/// Runs `processors` in order, feeding each the previous one's output.
///
/// The context's current event is updated before every processor. A
/// processor returning `None` stops the chain and filters the message. A
/// messaging exception is tagged with the name of the processor that raised
/// it unless an inner chain already tagged it.
///
/// # Errors
///
/// Returns the first error raised by a processor.
pub async fn run_chain(
    processors: &[Arc<dyn EventProcessor>],
    event: Event,
    ctx: &ExecutionContext,
) -> ExecutionResult {
    let mut current = event;
    for processor in processors {
        ctx.set_current_event(current.clone());
        match processor.process(current, ctx).await {
            Ok(Some(next)) => current = next,
            Ok(None) => {
                debug!(processor = processor.name(), "message filtered");
                return Ok(None);
            }
            Err(ExecutionError::Messaging(exception)) if exception.failing_processor().is_none() => {
                return Err(exception.with_failing_processor(processor.name()).into());
            }
            Err(err) => return Err(err),
        }
    }
    Ok(Some(current))
}

// ---------------------------------------------------------------------------
// Closure processors
// ---------------------------------------------------------------------------

struct FnProcessor<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventProcessor for FnProcessor<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionResult> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, event: Event, _ctx: &ExecutionContext) -> ExecutionResult {
        (self.f)(event).await
    }
}

/// Wraps an async closure as a named processor.
pub fn processor_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventProcessor>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult> + Send + 'static,
{
    Arc::new(FnProcessor {
        name: name.into(),
        f,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
