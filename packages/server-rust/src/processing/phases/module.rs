//! Policy-wrapped routing for module sources.

use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::{ConnectorAction, Event, MessagingException};
use tracing::{error, warn};

use super::{dispatch, policy_flow};
use crate::execution::{ExecutionContext, ExecutionError};
use crate::processing::completion::{Blocking, BlockingCompletionHandler, ResponseContext};
use crate::processing::context::MessageProcessContext;
use crate::processing::error::{CompletionError, PhaseError};
use crate::processing::notification::NotificationManager;
use crate::processing::phase::{MessageProcessPhase, PhaseKind, PhaseResultNotifier};
use crate::processing::policy::{PolicyManager, TemplateParameters};
use crate::processing::template::{
    FlowTemplate, MessageProcessTemplate, ModuleFlowProcessingPhaseTemplate, PhaseOutcome,
    SourceFlowTemplate,
};

/// Like the extension phase, but response outcomes arrive through
/// [`CompletionHandler`](crate::processing::completion::CompletionHandler)s
/// and the source is told the final outcome through
/// [`after_phase_execution`](ModuleFlowProcessingPhaseTemplate::after_phase_execution).
pub struct ModuleFlowProcessingPhase {
    notifications: Arc<NotificationManager>,
    policies: Arc<dyn PolicyManager>,
}

impl ModuleFlowProcessingPhase {
    #[must_use]
    pub fn new(notifications: Arc<NotificationManager>, policies: Arc<dyn PolicyManager>) -> Self {
        Self {
            notifications,
            policies,
        }
    }
}

#[async_trait]
impl MessageProcessPhase for ModuleFlowProcessingPhase {
    fn name(&self) -> &str {
        "module-flow-processing"
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::FlowProcessing
    }

    fn supports_template(&self, template: &MessageProcessTemplate) -> bool {
        matches!(template.flow(), Some(FlowTemplate::Module(_)))
    }

    async fn run_phase(
        &self,
        template: &MessageProcessTemplate,
        context: Arc<MessageProcessContext>,
        notifier: Arc<dyn PhaseResultNotifier>,
    ) {
        let Some(FlowTemplate::Module(source)) = template.flow().cloned() else {
            notifier.phase_failure(PhaseError::NoSupportingPhase).await;
            return;
        };
        let shared = ResponseContext {
            notifier: Arc::clone(&notifier),
            notifications: Arc::clone(&self.notifications),
            context: Arc::clone(&context),
        };
        let policies = Arc::clone(&self.policies);
        dispatch(&context, &notifier, process(source, shared, policies)).await;
    }
}

async fn process(
    source: Arc<dyn ModuleFlowProcessingPhaseTemplate>,
    shared: ResponseContext,
    policies: Arc<dyn PolicyManager>,
) {
    let event = match source.get_event().await {
        Ok(event) => event,
        Err(err) => {
            source
                .after_phase_execution(PhaseOutcome::Failure {
                    event: None,
                    error: err.to_string(),
                })
                .await;
            shared.notifier.phase_failure(PhaseError::Execution(err)).await;
            return;
        }
    };
    shared
        .notifications
        .fire(ConnectorAction::MessageReceived, &shared.context, Some(&event));

    let flow_name = shared.context.flow_name();
    let policy = policies.create_source_policy(
        shared.context.source_id(),
        flow_name.as_deref(),
        policy_flow(Arc::clone(&source), &shared.context),
        Arc::new(TemplateParameters(Arc::clone(&source))),
    );

    match policy.process(event).await {
        Ok(success) => {
            let handler = Blocking(ResponseHandler {
                shared,
                source: Arc::clone(&source),
                event: success.event.clone(),
            });
            source
                .send_response_to_client(success.event, success.response_parameters, Box::new(handler))
                .await;
        }
        Err(failure) => match failure.error {
            ExecutionError::Messaging(exception) => {
                let handler = Blocking(FailureResponseHandler {
                    shared,
                    source: Arc::clone(&source),
                    event: exception.event().clone(),
                    error: exception.to_string(),
                });
                source
                    .send_failure_response_to_client(
                        exception,
                        failure.error_response_parameters,
                        Box::new(handler),
                    )
                    .await;
            }
            fatal => {
                error!(error = %fatal, source = shared.context.source_id(), "module flow processing failed");
                source
                    .after_phase_execution(PhaseOutcome::Failure {
                        event: None,
                        error: fatal.to_string(),
                    })
                    .await;
                shared.notifier.phase_failure(PhaseError::Execution(fatal)).await;
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Response handlers
// ---------------------------------------------------------------------------

struct ResponseHandler {
    shared: ResponseContext,
    source: Arc<dyn ModuleFlowProcessingPhaseTemplate>,
    event: Event,
}

#[async_trait]
impl BlockingCompletionHandler<(), anyhow::Error> for ResponseHandler {
    async fn do_on_completion(&self, _result: ()) -> anyhow::Result<()> {
        self.shared.notifications.fire(
            ConnectorAction::MessageResponse,
            &self.shared.context,
            Some(&self.event),
        );
        self.source
            .after_phase_execution(PhaseOutcome::Success(self.event.clone()))
            .await;
        self.shared.notifier.phase_successfully().await;
        Ok(())
    }

    /// The response could not be sent: run the exception strategy, then
    /// answer with a failure response carrying the processed event.
    async fn do_on_failure(&self, err: anyhow::Error) {
        warn!(error = %err, "module response failed, running exception strategy");
        let mut exception = MessagingException::response_dispatch(self.event.clone(), err);
        let ctx = ExecutionContext::default();
        ctx.set_current_event(self.event.clone());
        let strategy = self.shared.context.exception_handler();
        match strategy.handle_exception(&mut exception, &ctx).await {
            Ok(processed) => {
                exception.set_processed_event(processed.clone());
                let parameters = self.source.failure_response_parameters(&processed);
                let handler = Blocking(FailureResponseHandler {
                    shared: self.shared.clone(),
                    source: Arc::clone(&self.source),
                    event: processed,
                    error: exception.to_string(),
                });
                self.source
                    .send_failure_response_to_client(exception, parameters, Box::new(handler))
                    .await;
            }
            Err(err) => {
                error!(error = %err, "exception strategy failed while handling response failure");
                self.source
                    .after_phase_execution(PhaseOutcome::Failure {
                        event: Some(self.event.clone()),
                        error: exception.to_string(),
                    })
                    .await;
                self.shared
                    .notifier
                    .phase_failure(PhaseError::Completion(CompletionError::Handler(err)))
                    .await;
            }
        }
    }
}

struct FailureResponseHandler {
    shared: ResponseContext,
    source: Arc<dyn ModuleFlowProcessingPhaseTemplate>,
    event: Event,
    error: String,
}

impl FailureResponseHandler {
    fn outcome(&self) -> PhaseOutcome {
        PhaseOutcome::Failure {
            event: Some(self.event.clone()),
            error: self.error.clone(),
        }
    }
}

#[async_trait]
impl BlockingCompletionHandler<(), anyhow::Error> for FailureResponseHandler {
    async fn do_on_completion(&self, _result: ()) -> anyhow::Result<()> {
        self.shared.notifications.fire(
            ConnectorAction::MessageErrorResponse,
            &self.shared.context,
            Some(&self.event),
        );
        self.source.after_phase_execution(self.outcome()).await;
        self.shared.notifier.phase_successfully().await;
        Ok(())
    }

    async fn do_on_failure(&self, err: anyhow::Error) {
        warn!(error = %err, "module failure response could not be sent");
        self.source.after_phase_execution(self.outcome()).await;
        self.shared.notifier.phase_failure(PhaseError::Template(err)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::execution::ExecutionResult;
    use crate::flow::FlowConstruct;
    use crate::processing::completion::{CompletionHandler, ExceptionCallback};
    use crate::processing::policy::NoPolicyManager;
    use crate::processing::template::ResponseParameters;
    use crate::testing::{
        failing_processor, set_payload, RecordingExceptionHandler, RecordingListener,
        RecordingNotifier, Signal,
    };
    use crate::traits::EventProcessor;

    struct ModuleSource {
        flow: Arc<FlowConstruct>,
        fail_response: bool,
        log: Mutex<Vec<String>>,
    }

    impl ModuleSource {
        fn push(&self, entry: String) {
            self.log.lock().push(entry);
        }
    }

    #[async_trait]
    impl SourceFlowTemplate for ModuleSource {
        async fn get_event(&self) -> Result<Event, ExecutionError> {
            Ok(Event::new("in"))
        }

        async fn route_event(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult {
            self.flow.process(event, ctx).await
        }
    }

    #[async_trait]
    impl ModuleFlowProcessingPhaseTemplate for ModuleSource {
        async fn send_response_to_client(
            &self,
            response: Event,
            _parameters: ResponseParameters,
            handler: Box<dyn CompletionHandler<(), anyhow::Error>>,
        ) {
            self.push(format!("response:{}", response.payload().as_str().unwrap_or_default()));
            if self.fail_response {
                handler.on_failure(anyhow::anyhow!("pipe broken")).await;
            } else {
                handler
                    .on_completion((), ExceptionCallback::new(|_| Box::pin(async {})))
                    .await;
            }
        }

        async fn send_failure_response_to_client(
            &self,
            exception: MessagingException,
            _parameters: ResponseParameters,
            handler: Box<dyn CompletionHandler<(), anyhow::Error>>,
        ) {
            self.push(format!("failure-response:{}", exception.message()));
            handler
                .on_completion((), ExceptionCallback::new(|_| Box::pin(async {})))
                .await;
        }

        async fn after_phase_execution(&self, outcome: PhaseOutcome) {
            let entry = match outcome {
                PhaseOutcome::Success(event) => {
                    format!("after:success:{}", event.payload().as_str().unwrap_or_default())
                }
                PhaseOutcome::Failure { .. } => "after:failure".to_string(),
            };
            self.push(entry);
        }
    }

    async fn run(flow: FlowConstruct, fail_response: bool) -> (Vec<String>, Vec<Signal>, Vec<ConnectorAction>) {
        run_in(flow, fail_response, MessageProcessContext::new("module")).await
    }

    async fn run_in(
        flow: FlowConstruct,
        fail_response: bool,
        context: MessageProcessContext,
    ) -> (Vec<String>, Vec<Signal>, Vec<ConnectorAction>) {
        let source = Arc::new(ModuleSource {
            flow: Arc::new(flow),
            fail_response,
            log: Mutex::new(Vec::new()),
        });
        let notifications = Arc::new(NotificationManager::default());
        let listener = Arc::new(RecordingListener::default());
        notifications.add_listener(listener.clone());
        let notifier = Arc::new(RecordingNotifier::default());
        let template = MessageProcessTemplate::new().with_flow(FlowTemplate::Module(source.clone()));

        ModuleFlowProcessingPhase::new(notifications, Arc::new(NoPolicyManager))
            .run_phase(&template, Arc::new(context), notifier.clone())
            .await;
        let log = source.log.lock().clone();
        (log, notifier.signals(), listener.actions())
    }

    #[tokio::test]
    async fn success_reports_outcome_after_response() {
        let (log, signals, actions) = run(FlowConstruct::new("main", vec![set_payload("set", "out")]), false).await;
        assert_eq!(log, vec!["response:out", "after:success:out"]);
        assert_eq!(signals, vec![Signal::Success]);
        assert_eq!(
            actions,
            vec![ConnectorAction::MessageReceived, ConnectorAction::MessageResponse]
        );
    }

    #[tokio::test]
    async fn routing_failure_sends_failure_response() {
        let (log, signals, actions) =
            run(FlowConstruct::new("main", vec![failing_processor("boom")]), false).await;
        assert_eq!(log, vec!["failure-response:processor failed", "after:failure"]);
        assert_eq!(signals, vec![Signal::Success]);
        assert_eq!(
            actions,
            vec![ConnectorAction::MessageReceived, ConnectorAction::MessageErrorResponse]
        );
    }

    #[tokio::test]
    async fn failed_response_falls_back_to_failure_response() {
        let (log, signals, _) = run(FlowConstruct::new("main", vec![set_payload("set", "out")]), true).await;
        assert_eq!(
            log,
            vec![
                "response:out",
                "failure-response:failed to dispatch response: pipe broken",
                "after:failure",
            ]
        );
        assert_eq!(signals, vec![Signal::Success]);
    }

    fn context_with_strategy(strategy: &Arc<RecordingExceptionHandler>) -> MessageProcessContext {
        let flow = FlowConstruct::new("main", vec![set_payload("set", "out")])
            .with_exception_handler(strategy.clone());
        MessageProcessContext::new("module").with_flow(Arc::new(flow))
    }

    #[tokio::test]
    async fn failed_response_runs_exception_strategy_once() {
        let strategy = Arc::new(RecordingExceptionHandler::handling());
        let (log, signals, actions) = run_in(
            FlowConstruct::new("main", vec![set_payload("set", "out")]),
            true,
            context_with_strategy(&strategy),
        )
        .await;

        assert_eq!(strategy.calls(), 1);
        assert_eq!(
            log,
            vec![
                "response:out",
                "failure-response:failed to dispatch response: pipe broken",
                "after:failure",
            ]
        );
        assert_eq!(signals, vec![Signal::Success]);
        assert_eq!(
            actions,
            vec![ConnectorAction::MessageReceived, ConnectorAction::MessageErrorResponse]
        );
    }

    #[tokio::test]
    async fn failing_exception_strategy_fails_the_phase() {
        let strategy = Arc::new(RecordingExceptionHandler::failing());
        let (log, signals, _) = run_in(
            FlowConstruct::new("main", vec![set_payload("set", "out")]),
            true,
            context_with_strategy(&strategy),
        )
        .await;

        assert_eq!(strategy.calls(), 1);
        assert_eq!(log, vec!["response:out", "after:failure"]);
        assert!(
            matches!(signals.as_slice(), [Signal::Failure(reason)] if reason.contains("strategy exploded"))
        );
    }
}
