//! Routes messaging exceptions to the exception strategy.

use std::sync::Arc;
use std::task::{Context, Poll};

use conveyor_core::Event;
use tower::{Layer, Service};
use tracing::{debug, error};

use crate::execution::callback::{Execution, ExecutionFuture};
use crate::execution::error::ExecutionError;
use crate::traits::MessagingExceptionHandler;

// ---------------------------------------------------------------------------
// HandleExceptionLayer
// ---------------------------------------------------------------------------

/// Tower layer that hands every unhandled [`ExecutionError::Messaging`] to an
/// exception strategy and re-raises it carrying the strategy's event.
///
/// Whether the exception comes back handled is up to the strategy. A failure
/// of the strategy itself becomes [`ExecutionError::Fatal`].
#[derive(Clone)]
pub struct HandleExceptionLayer {
    handler: Arc<dyn MessagingExceptionHandler>,
}

impl HandleExceptionLayer {
    #[must_use]
    pub fn new(handler: Arc<dyn MessagingExceptionHandler>) -> Self {
        Self { handler }
    }
}

impl<S> Layer<S> for HandleExceptionLayer {
    type Service = HandleExceptionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HandleExceptionService {
            inner,
            handler: Arc::clone(&self.handler),
        }
    }
}

// ---------------------------------------------------------------------------
// HandleExceptionService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HandleExceptionService<S> {
    inner: S,
    handler: Arc<dyn MessagingExceptionHandler>,
}

impl<S> Service<Execution> for HandleExceptionService<S>
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
        let handler = Arc::clone(&self.handler);
        let ctx = execution.ctx.clone();

        Box::pin(async move {
            match inner.call(execution).await {
                Err(ExecutionError::Messaging(mut exception)) if !exception.handled() => {
                    debug!(
                        error = %exception,
                        processor = exception.failing_processor(),
                        "invoking exception strategy"
                    );
                    let processed = match handler.handle_exception(&mut exception, &ctx).await {
                        Ok(event) => event,
                        Err(err) => {
                            error!(error = %err, original = %exception, "exception strategy failed");
                            return Err(ExecutionError::Fatal(err.context(format!(
                                "exception strategy failed while handling: {exception}"
                            ))));
                        }
                    };
                    exception.set_processed_event(processed);
                    Err(exception.into())
                }
                other => other,
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
    use crate::testing::{failing_callback, fatal_callback, ok_callback, RecordingExceptionHandler};

    fn service(handler: Arc<RecordingExceptionHandler>) -> HandleExceptionService<ExecuteCallbackService> {
        HandleExceptionLayer::new(handler).layer(ExecuteCallbackService)
    }

    #[tokio::test]
    async fn success_bypasses_handler() {
        let handler = Arc::new(RecordingExceptionHandler::handling());
        let event = Event::new("ok");
        let result = service(handler.clone())
            .oneshot(Execution::new(ok_callback(event.clone()), ExecutionContext::default()))
            .await
            .unwrap();
        assert_eq!(result, Some(event));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn rethrows_with_recovered_event() {
        let handler = Arc::new(RecordingExceptionHandler::handling());
        let err = service(handler.clone())
            .oneshot(Execution::new(failing_callback("boom"), ExecutionContext::default()))
            .await
            .unwrap_err();

        let exception = err.as_messaging().unwrap();
        assert!(exception.handled());
        assert_eq!(exception.event().payload().as_str(), Some("recovered"));
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn unhandled_stays_unhandled() {
        let handler = Arc::new(RecordingExceptionHandler::propagating());
        let err = service(handler.clone())
            .oneshot(Execution::new(failing_callback("boom"), ExecutionContext::default()))
            .await
            .unwrap_err();

        assert!(!err.is_handled());
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn handler_failure_is_fatal() {
        let handler = Arc::new(RecordingExceptionHandler::failing());
        let err = service(handler)
            .oneshot(Execution::new(failing_callback("boom"), ExecutionContext::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Fatal(_)));
    }

    #[tokio::test]
    async fn fatal_errors_skip_handler() {
        let handler = Arc::new(RecordingExceptionHandler::handling());
        let err = service(handler.clone())
            .oneshot(Execution::new(fatal_callback("kaboom"), ExecutionContext::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Fatal(_)));
        assert_eq!(handler.calls(), 0);
    }
}
