//! Completion protocol between phases and message sources whose responses
//! complete later.
//!
//! [`ResponseCompletionCallback`] implementations here are single-shot: the
//! first call decides the phase outcome, later calls are logged and return
//! [`CompletionError::AlreadyCompleted`]. [`CompletionHandler`] is consumed
//! by its first call instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::{ConnectorAction, Event, MessagingException};
use futures_util::future::BoxFuture;
use tracing::{debug, error, warn};

use super::context::MessageProcessContext;
use super::error::{CompletionError, PhaseError};
use super::notification::NotificationManager;
use super::phase::PhaseResultNotifier;
use crate::execution::{ExecutionContext, ExecutionError};

// ---------------------------------------------------------------------------
// ResponseCompletionCallback
// ---------------------------------------------------------------------------

/// Reports whether a response handed to a message source was transmitted.
#[async_trait]
pub trait ResponseCompletionCallback: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CompletionError::AlreadyCompleted`] on a repeated call.
    async fn response_sent_successfully(&self) -> Result<(), CompletionError>;

    /// Reports that sending failed with `exception` while responding for
    /// `event`, returning the event produced while handling the failure.
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError::AlreadyCompleted`] on a repeated call, or
    /// [`CompletionError::Handler`] if the exception strategy failed.
    async fn response_sent_with_failure(
        &self,
        exception: MessagingException,
        event: Event,
    ) -> Result<Event, CompletionError>;
}

/// What a phase's completion callbacks need to finish the phase.
#[derive(Clone)]
pub(crate) struct ResponseContext {
    pub notifier: Arc<dyn PhaseResultNotifier>,
    pub notifications: Arc<NotificationManager>,
    pub context: Arc<MessageProcessContext>,
}

/// Sends a failure response through the message source, completing through
/// the given callback.
pub(crate) type FailureResponder = Arc<
    dyn Fn(MessagingException, Arc<dyn ResponseCompletionCallback>) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

fn first_call(done: &AtomicBool, what: &str) -> Result<(), CompletionError> {
    if done.swap(true, Ordering::SeqCst) {
        warn!(callback = what, "completion callback invoked more than once, ignoring");
        return Err(CompletionError::AlreadyCompleted);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FlowResponseCompletion
// ---------------------------------------------------------------------------

/// Completion of the response to a successfully routed event.
///
/// When sending fails, the flow's exception strategy runs on the failure and
/// a failure response is sent, completed through a
/// [`FailureResponseCompletion`].
pub(crate) struct FlowResponseCompletion {
    shared: ResponseContext,
    response: Option<Event>,
    responder: FailureResponder,
    done: AtomicBool,
}

impl FlowResponseCompletion {
    pub fn new(shared: ResponseContext, response: Option<Event>, responder: FailureResponder) -> Self {
        Self {
            shared,
            response,
            responder,
            done: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ResponseCompletionCallback for FlowResponseCompletion {
    async fn response_sent_successfully(&self) -> Result<(), CompletionError> {
        first_call(&self.done, "response")?;
        self.shared.notifications.fire(
            ConnectorAction::MessageResponse,
            &self.shared.context,
            self.response.as_ref(),
        );
        self.shared.notifier.phase_successfully().await;
        Ok(())
    }

    async fn response_sent_with_failure(
        &self,
        mut exception: MessagingException,
        event: Event,
    ) -> Result<Event, CompletionError> {
        first_call(&self.done, "response")?;
        debug!(error = %exception, "response failed, running exception strategy");

        let ctx = ExecutionContext::default();
        ctx.set_current_event(event);
        let handler = self.shared.context.exception_handler();
        match handler.handle_exception(&mut exception, &ctx).await {
            Ok(processed) => {
                exception.set_processed_event(processed.clone());
                let failure = Arc::new(FailureResponseCompletion::new(
                    self.shared.clone(),
                    processed.clone(),
                ));
                (self.responder)(exception, failure).await;
                Ok(processed)
            }
            Err(err) => {
                error!(error = %err, "exception strategy failed while handling response failure");
                self.shared
                    .notifier
                    .phase_failure(PhaseError::Completion(CompletionError::Handler(
                        anyhow::anyhow!("{err:#}"),
                    )))
                    .await;
                Err(CompletionError::Handler(err))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FailureResponseCompletion
// ---------------------------------------------------------------------------

/// Completion of a failure response.
pub(crate) struct FailureResponseCompletion {
    shared: ResponseContext,
    event: Event,
    done: AtomicBool,
}

impl FailureResponseCompletion {
    pub fn new(shared: ResponseContext, event: Event) -> Self {
        Self {
            shared,
            event,
            done: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ResponseCompletionCallback for FailureResponseCompletion {
    async fn response_sent_successfully(&self) -> Result<(), CompletionError> {
        first_call(&self.done, "failure response")?;
        self.shared.notifications.fire(
            ConnectorAction::MessageErrorResponse,
            &self.shared.context,
            Some(&self.event),
        );
        self.shared.notifier.phase_successfully().await;
        Ok(())
    }

    async fn response_sent_with_failure(
        &self,
        exception: MessagingException,
        event: Event,
    ) -> Result<Event, CompletionError> {
        first_call(&self.done, "failure response")?;
        warn!(error = %exception, "failure response could not be sent");
        self.shared
            .notifier
            .phase_failure(PhaseError::Execution(ExecutionError::Messaging(exception)))
            .await;
        Ok(event)
    }
}

// ---------------------------------------------------------------------------
// CompletionHandler
// ---------------------------------------------------------------------------

/// Routes a failure raised while completing back to the producer of the
/// result.
pub struct ExceptionCallback<E>(Box<dyn FnOnce(E) -> BoxFuture<'static, ()> + Send>);

impl<E> ExceptionCallback<E> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(E) -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub async fn on_exception(self, error: E) {
        (self.0)(error).await;
    }
}

/// Receives the outcome of an asynchronous operation. Consumed by whichever
/// method is called first.
#[async_trait]
pub trait CompletionHandler<R: Send + 'static, E: Send + 'static>: Send {
    async fn on_completion(self: Box<Self>, result: R, exception_callback: ExceptionCallback<E>);

    async fn on_failure(self: Box<Self>, error: E);
}

/// A completion handler whose success path may itself fail. Failures of
/// [`do_on_completion`](Self::do_on_completion) are routed to the exception
/// callback by the [`Blocking`] adapter.
#[async_trait]
pub trait BlockingCompletionHandler<R: Send + 'static, E: Send + 'static>: Send + Sync {
    async fn do_on_completion(&self, result: R) -> Result<(), E>;

    async fn do_on_failure(&self, error: E);
}

/// Adapts a [`BlockingCompletionHandler`] into a [`CompletionHandler`].
pub struct Blocking<H>(pub H);

#[async_trait]
impl<R, E, H> CompletionHandler<R, E> for Blocking<H>
where
    R: Send + 'static,
    E: Send + 'static,
    H: BlockingCompletionHandler<R, E> + 'static,
{
    async fn on_completion(self: Box<Self>, result: R, exception_callback: ExceptionCallback<E>) {
        if let Err(err) = self.0.do_on_completion(result).await {
            exception_callback.on_exception(err).await;
        }
    }

    async fn on_failure(self: Box<Self>, error: E) {
        self.0.do_on_failure(error).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
