//! Policy-wrapped routing for extension sources.

use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::{ConnectorAction, MessagingException};
use futures_util::future::BoxFuture;
use tracing::error;

use super::{dispatch, policy_flow};
use crate::execution::ExecutionError;
use crate::processing::completion::{
    FailureResponder, FailureResponseCompletion, FlowResponseCompletion, ResponseCompletionCallback,
    ResponseContext,
};
use crate::processing::context::MessageProcessContext;
use crate::processing::error::PhaseError;
use crate::processing::notification::NotificationManager;
use crate::processing::phase::{MessageProcessPhase, PhaseKind, PhaseResultNotifier};
use crate::processing::policy::{PolicyManager, TemplateParameters};
use crate::processing::template::{
    ExtensionFlowProcessingPhaseTemplate, FlowTemplate, MessageProcessTemplate, SourceFlowTemplate,
};

/// Runs the source's policy chain around the flow and answers with the
/// response parameters the policy computed. Response outcomes are reported
/// through [`ResponseCompletionCallback`]s.
pub struct ExtensionFlowProcessingPhase {
    notifications: Arc<NotificationManager>,
    policies: Arc<dyn PolicyManager>,
}

impl ExtensionFlowProcessingPhase {
    #[must_use]
    pub fn new(notifications: Arc<NotificationManager>, policies: Arc<dyn PolicyManager>) -> Self {
        Self {
            notifications,
            policies,
        }
    }
}

#[async_trait]
impl MessageProcessPhase for ExtensionFlowProcessingPhase {
    fn name(&self) -> &str {
        "extension-flow-processing"
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::FlowProcessing
    }

    fn supports_template(&self, template: &MessageProcessTemplate) -> bool {
        matches!(template.flow(), Some(FlowTemplate::Extension(_)))
    }

    async fn run_phase(
        &self,
        template: &MessageProcessTemplate,
        context: Arc<MessageProcessContext>,
        notifier: Arc<dyn PhaseResultNotifier>,
    ) {
        let Some(FlowTemplate::Extension(source)) = template.flow().cloned() else {
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
    source: Arc<dyn ExtensionFlowProcessingPhaseTemplate>,
    shared: ResponseContext,
    policies: Arc<dyn PolicyManager>,
) {
    let event = match source.get_event().await {
        Ok(event) => event,
        Err(err) => {
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
            let completion = Arc::new(FlowResponseCompletion::new(
                shared,
                Some(success.event.clone()),
                failure_responder(Arc::clone(&source)),
            ));
            source
                .send_response_to_client(success.event, success.response_parameters, completion)
                .await;
        }
        Err(failure) => match failure.error {
            ExecutionError::Messaging(exception) => {
                let completion = Arc::new(FailureResponseCompletion::new(
                    shared,
                    exception.event().clone(),
                ));
                source
                    .send_failure_response_to_client(
                        exception,
                        failure.error_response_parameters,
                        completion,
                    )
                    .await;
            }
            fatal => {
                error!(error = %fatal, source = shared.context.source_id(), "extension flow processing failed");
                shared.notifier.phase_failure(PhaseError::Execution(fatal)).await;
            }
        },
    }
}

fn failure_responder(source: Arc<dyn ExtensionFlowProcessingPhaseTemplate>) -> FailureResponder {
    Arc::new(
        move |exception: MessagingException,
              callback: Arc<dyn ResponseCompletionCallback>|
              -> BoxFuture<'static, ()> {
            let source = Arc::clone(&source);
            Box::pin(async move {
                let parameters = source.failure_response_parameters(exception.event());
                source
                    .send_failure_response_to_client(exception, parameters, callback)
                    .await;
            })
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
