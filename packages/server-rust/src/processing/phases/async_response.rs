//! Routing whose response completes after the phase returns.

use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::{ConnectorAction, MessagingException};
use futures_util::future::BoxFuture;
use tracing::error;

use super::dispatch;
use crate::execution::{
    ExecutionCallback, ExecutionError, ExecutionTemplate,
    TransactionalErrorHandlingExecutionTemplate,
};
use crate::processing::completion::{
    FailureResponder, FailureResponseCompletion, FlowResponseCompletion, ResponseCompletionCallback,
    ResponseContext,
};
use crate::processing::context::MessageProcessContext;
use crate::processing::error::PhaseError;
use crate::processing::notification::NotificationManager;
use crate::processing::phase::{MessageProcessPhase, PhaseKind, PhaseResultNotifier};
use crate::processing::template::{
    AsyncResponseFlowProcessingPhaseTemplate, FlowTemplate, MessageProcessTemplate,
};

/// Routes the event inside the main execution template and hands the result
/// to the source. The phase outcome is reported by the completion callback
/// once the source knows whether the response went out.
pub struct AsyncResponseFlowProcessingPhase {
    notifications: Arc<NotificationManager>,
}

impl AsyncResponseFlowProcessingPhase {
    #[must_use]
    pub fn new(notifications: Arc<NotificationManager>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl MessageProcessPhase for AsyncResponseFlowProcessingPhase {
    fn name(&self) -> &str {
        "async-response-flow-processing"
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::FlowProcessing
    }

    fn supports_template(&self, template: &MessageProcessTemplate) -> bool {
        matches!(template.flow(), Some(FlowTemplate::AsyncResponse(_)))
    }

    async fn run_phase(
        &self,
        template: &MessageProcessTemplate,
        context: Arc<MessageProcessContext>,
        notifier: Arc<dyn PhaseResultNotifier>,
    ) {
        let Some(FlowTemplate::AsyncResponse(source)) = template.flow().cloned() else {
            notifier.phase_failure(PhaseError::NoSupportingPhase).await;
            return;
        };
        let shared = ResponseContext {
            notifier: Arc::clone(&notifier),
            notifications: Arc::clone(&self.notifications),
            context: Arc::clone(&context),
        };
        dispatch(&context, &notifier, process(source, shared)).await;
    }
}

async fn process(source: Arc<dyn AsyncResponseFlowProcessingPhaseTemplate>, shared: ResponseContext) {
    let execution = TransactionalErrorHandlingExecutionTemplate::create_main_execution_template(
        shared.context.transaction_config().clone(),
        shared.context.exception_handler(),
    );
    let callback = {
        let source = Arc::clone(&source);
        let shared = shared.clone();
        ExecutionCallback::new(move |ctx| async move {
            let event = source.get_event().await?;
            shared
                .notifications
                .fire(ConnectorAction::MessageReceived, &shared.context, Some(&event));
            source.route_event(event, &ctx).await
        })
    };

    match execution.execute(callback).await {
        Ok(response) => {
            let completion = Arc::new(FlowResponseCompletion::new(
                shared,
                response.clone(),
                failure_responder(Arc::clone(&source)),
            ));
            source.send_response_to_client(response, completion).await;
        }
        Err(ExecutionError::Messaging(exception)) => {
            let completion = Arc::new(FailureResponseCompletion::new(
                shared,
                exception.event().clone(),
            ));
            source.send_failure_response_to_client(exception, completion).await;
        }
        Err(fatal) => {
            error!(error = %fatal, source = shared.context.source_id(), "async flow processing failed");
            shared.notifier.phase_failure(PhaseError::Execution(fatal)).await;
        }
    }
}

fn failure_responder(source: Arc<dyn AsyncResponseFlowProcessingPhaseTemplate>) -> FailureResponder {
    Arc::new(
        move |exception: MessagingException,
              callback: Arc<dyn ResponseCompletionCallback>|
              -> BoxFuture<'static, ()> {
            let source = Arc::clone(&source);
            Box::pin(async move { source.send_failure_response_to_client(exception, callback).await })
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use conveyor_core::Event;
    use parking_lot::Mutex;

    use super::*;
    use crate::execution::{ExecutionContext, ExecutionResult};
    use crate::flow::{ContinueErrorHandler, FlowConstruct};
    use crate::testing::{failing_processor, set_payload, RecordingNotifier, Signal};
    use crate::traits::EventProcessor;

    /// Source that acknowledges responses immediately, failing the first
    /// successful response when asked to.
    struct AckSource {
        flow: Arc<FlowConstruct>,
        fail_first_response: bool,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AsyncResponseFlowProcessingPhaseTemplate for AckSource {
        async fn get_event(&self) -> Result<Event, ExecutionError> {
            Ok(Event::new("in"))
        }

        async fn route_event(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult {
            self.flow.process(event, ctx).await
        }

        async fn send_response_to_client(
            &self,
            response: Option<Event>,
            callback: Arc<dyn ResponseCompletionCallback>,
        ) {
            let payload = response.as_ref().and_then(|e| e.payload().as_str().map(str::to_string));
            self.log.lock().push(format!("response:{}", payload.unwrap_or_default()));
            if self.fail_first_response {
                let event = response.unwrap_or_else(|| Event::new("none"));
                let exception = MessagingException::response_dispatch(event.clone(), "socket closed");
                callback.response_sent_with_failure(exception, event).await.unwrap();
            } else {
                callback.response_sent_successfully().await.unwrap();
            }
        }

        async fn send_failure_response_to_client(
            &self,
            exception: MessagingException,
            callback: Arc<dyn ResponseCompletionCallback>,
        ) {
            self.log.lock().push(format!("failure-response:{}", exception.message()));
            callback.response_sent_successfully().await.unwrap();
        }
    }

    async fn run(flow: FlowConstruct, fail_first_response: bool) -> (Vec<String>, Vec<Signal>) {
        let flow = Arc::new(flow);
        let source = Arc::new(AckSource {
            flow: flow.clone(),
            fail_first_response,
            log: Mutex::new(Vec::new()),
        });
        let template = MessageProcessTemplate::new().with_flow(FlowTemplate::AsyncResponse(source.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let context = Arc::new(MessageProcessContext::new("src").with_flow(flow));

        AsyncResponseFlowProcessingPhase::new(Arc::new(NotificationManager::default()))
            .run_phase(&template, context, notifier.clone())
            .await;
        let log = source.log.lock().clone();
        (log, notifier.signals())
    }

    #[tokio::test]
    async fn acknowledged_response_completes_phase() {
        let (log, signals) = run(FlowConstruct::new("main", vec![set_payload("set", "out")]), false).await;
        assert_eq!(log, vec!["response:out"]);
        assert_eq!(signals, vec![Signal::Success]);
    }

    #[tokio::test]
    async fn routing_failure_sends_failure_response() {
        let (log, signals) = run(FlowConstruct::new("main", vec![failing_processor("boom")]), false).await;
        assert_eq!(log, vec!["failure-response:processor failed"]);
        assert_eq!(signals, vec![Signal::Success]);
    }

    #[tokio::test]
    async fn failed_response_runs_strategy_then_failure_response() {
        let flow = FlowConstruct::new("main", vec![set_payload("set", "out")])
            .with_exception_handler(Arc::new(ContinueErrorHandler::default()));
        let (log, signals) = run(flow, true).await;

        assert_eq!(
            log,
            vec!["response:out", "failure-response:failed to dispatch response: socket closed"]
        );
        // One terminal signal, from the failure response.
        assert_eq!(signals, vec![Signal::Success]);
    }
}
