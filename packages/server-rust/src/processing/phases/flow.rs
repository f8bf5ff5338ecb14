//! Request/optional-response routing through a flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::{ConnectorAction, MessagingException};
use tracing::{debug, error, warn};

use super::dispatch;
use crate::execution::{
    ExecutionCallback, ExecutionError, ExecutionTemplate,
    TransactionalErrorHandlingExecutionTemplate,
};
use crate::processing::context::MessageProcessContext;
use crate::processing::error::PhaseError;
use crate::processing::notification::NotificationManager;
use crate::processing::phase::{MessageProcessPhase, PhaseKind, PhaseResultNotifier};
use crate::processing::template::{FlowProcessingPhaseTemplate, FlowTemplate, MessageProcessTemplate};

/// Routes the event through the owning flow inside the main execution
/// template, then answers the source if it expects a response.
///
/// At most one response is attempted per message. A failure raised while
/// routing is answered with a failure response and still completes the phase
/// successfully; only fatal errors fail it.
pub struct FlowProcessingPhase {
    notifications: Arc<NotificationManager>,
}

impl FlowProcessingPhase {
    #[must_use]
    pub fn new(notifications: Arc<NotificationManager>) -> Self {
        Self { notifications }
    }
}

#[derive(Default)]
struct ResponseState {
    attempted: AtomicBool,
    thrown: AtomicBool,
}

#[async_trait]
impl MessageProcessPhase for FlowProcessingPhase {
    fn name(&self) -> &str {
        "flow-processing"
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::FlowProcessing
    }

    fn supports_template(&self, template: &MessageProcessTemplate) -> bool {
        matches!(template.flow(), Some(FlowTemplate::Flow(_)))
    }

    async fn run_phase(
        &self,
        template: &MessageProcessTemplate,
        context: Arc<MessageProcessContext>,
        notifier: Arc<dyn PhaseResultNotifier>,
    ) {
        let Some(FlowTemplate::Flow(source)) = template.flow().cloned() else {
            notifier.phase_failure(PhaseError::NoSupportingPhase).await;
            return;
        };
        let work = process(
            source,
            Arc::clone(&context),
            Arc::clone(&notifier),
            Arc::clone(&self.notifications),
        );
        dispatch(&context, &notifier, work).await;
    }
}

async fn process(
    source: Arc<dyn FlowProcessingPhaseTemplate>,
    context: Arc<MessageProcessContext>,
    notifier: Arc<dyn PhaseResultNotifier>,
    notifications: Arc<NotificationManager>,
) {
    let state = Arc::new(ResponseState::default());
    let execution = TransactionalErrorHandlingExecutionTemplate::create_main_execution_template(
        context.transaction_config().clone(),
        context.exception_handler(),
    );

    let callback = {
        let source = Arc::clone(&source);
        let context = Arc::clone(&context);
        let notifications = Arc::clone(&notifications);
        let state = Arc::clone(&state);
        ExecutionCallback::new(move |ctx| async move {
            let routed = async {
                let event = source.get_event().await?;
                notifications.fire(ConnectorAction::MessageReceived, &context, Some(&event));
                let event = source.before_route_event(event).await?;
                let result = source.route_event(event.clone(), &ctx).await?;
                let result = source.after_route_event(result).await?;

                if let Some(responder) = source.as_request_response() {
                    state.attempted.store(true, Ordering::SeqCst);
                    responder
                        .send_response_to_client(result.as_ref())
                        .await
                        .map_err(|err| {
                            MessagingException::response_dispatch(
                                result.clone().unwrap_or_else(|| event.clone()),
                                err,
                            )
                        })?;
                    notifications.fire(ConnectorAction::MessageResponse, &context, result.as_ref());
                }
                Ok::<_, ExecutionError>(result)
            }
            .await;
            if routed.is_err() {
                state.thrown.store(true, Ordering::SeqCst);
            }
            routed
        })
    };

    match execution.execute(callback).await {
        Ok(response) => {
            // A handled exception skipped the response inside the callback.
            if state.thrown.load(Ordering::SeqCst) && !state.attempted.swap(true, Ordering::SeqCst) {
                if let Some(responder) = source.as_request_response() {
                    if let Err(err) = responder.send_response_to_client(response.as_ref()).await {
                        warn!(error = %err, "failed to send response after handled exception");
                        let failure = match response {
                            Some(event) => ExecutionError::Messaging(
                                MessagingException::response_dispatch(event, err),
                            ),
                            None => ExecutionError::Fatal(err),
                        };
                        after_failure(source.as_ref(), &failure).await;
                        notifier.phase_successfully().await;
                        return;
                    }
                    notifications.fire(ConnectorAction::MessageResponse, &context, response.as_ref());
                }
            }
            match source.after_successful_processing_flow(response.as_ref()).await {
                Ok(()) => notifier.phase_successfully().await,
                Err(err) => notifier.phase_failure(PhaseError::Template(err)).await,
            }
        }
        Err(err) if err.is_response_dispatch() => {
            debug!(error = %err, "response dispatch failed, not responding again");
            after_failure(source.as_ref(), &err).await;
            notifier.phase_successfully().await;
        }
        Err(ExecutionError::Messaging(exception)) => {
            if !state.attempted.swap(true, Ordering::SeqCst) {
                if let Some(responder) = source.as_request_response() {
                    match responder.send_failure_response_to_client(&exception).await {
                        Ok(()) => notifications.fire(
                            ConnectorAction::MessageErrorResponse,
                            &context,
                            Some(exception.event()),
                        ),
                        Err(err) => warn!(error = %err, "failed to send failure response"),
                    }
                }
            }
            after_failure(source.as_ref(), &ExecutionError::Messaging(exception)).await;
            notifier.phase_successfully().await;
        }
        Err(fatal) => {
            error!(error = %fatal, source = context.source_id(), "flow processing failed");
            after_failure(source.as_ref(), &fatal).await;
            notifier.phase_failure(PhaseError::Execution(fatal)).await;
        }
    }
}

async fn after_failure(source: &dyn FlowProcessingPhaseTemplate, err: &ExecutionError) {
    if let Err(hook) = source.after_failure_processing_flow(err).await {
        warn!(error = %hook, "after-failure hook failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
