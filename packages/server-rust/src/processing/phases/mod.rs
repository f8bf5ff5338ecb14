//! Built-in phases.

pub mod async_response;
pub mod end;
pub mod extension;
pub mod flow;
pub mod module;
pub mod validation;

pub use async_response::AsyncResponseFlowProcessingPhase;
pub use end::EndProcessPhase;
pub use extension::ExtensionFlowProcessingPhase;
pub use flow::FlowProcessingPhase;
pub use module::ModuleFlowProcessingPhase;
pub use validation::ValidationPhase;

use std::future::Future;
use std::sync::Arc;

use conveyor_core::Event;
use tracing::{warn, Instrument};

use super::context::MessageProcessContext;
use super::error::PhaseError;
use super::phase::PhaseResultNotifier;
use super::policy::FlowExecution;
use super::template::SourceFlowTemplate;
use crate::execution::{
    ExecutionCallback, ExecutionFuture, ExecutionTemplate,
    TransactionalErrorHandlingExecutionTemplate,
};

/// Runs a phase's work inline, or on the context's executor when the message
/// supports asynchronous processing. Rejected work fails the phase.
pub(crate) async fn dispatch<F>(
    context: &MessageProcessContext,
    notifier: &Arc<dyn PhaseResultNotifier>,
    work: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let work = work.instrument(tracing::Span::current());
    match context.executor() {
        Some(executor) => {
            if let Err(rejected) = executor.schedule_work(Box::pin(work)) {
                metrics::counter!("conveyor_work_rejected_total").increment(1);
                warn!(error = %rejected, source = context.source_id(), "phase work rejected");
                notifier.phase_failure(PhaseError::WorkRejected(rejected)).await;
            }
        }
        None => work.await,
    }
}

/// Flow execution for policy-wrapped sources: each call routes one event
/// through the source inside a fresh main execution template run.
pub(crate) fn policy_flow<T>(source: Arc<T>, context: &MessageProcessContext) -> FlowExecution
where
    T: SourceFlowTemplate + ?Sized + 'static,
{
    let execution = TransactionalErrorHandlingExecutionTemplate::create_main_execution_template(
        context.transaction_config().clone(),
        context.exception_handler(),
    );
    Arc::new(move |event: Event| -> ExecutionFuture {
        let execution = execution.clone();
        let source = Arc::clone(&source);
        Box::pin(async move {
            let callback =
                ExecutionCallback::new(move |ctx| async move { source.route_event(event, &ctx).await });
            execution.execute(callback).await
        })
    })
}
