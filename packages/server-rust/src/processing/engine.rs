//! Drives one message through the ordered phase list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::{debug, info_span, warn, Instrument, Span};

use super::context::MessageProcessContext;
use super::error::PhaseError;
use super::phase::{insert_sorted, sort_phases, MessageProcessPhase, PhaseKind, PhaseResultNotifier};
use super::template::MessageProcessTemplate;
use crate::traits::SystemExceptionHandler;

/// How a message left the phase list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Consumed,
    Failure,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Consumed => "consumed",
            Self::Failure => "failure",
        }
    }
}

// ---------------------------------------------------------------------------
// PhaseExecutionEngine
// ---------------------------------------------------------------------------

/// Immutable, sorted phase list plus the terminal end phase.
///
/// The engine runs every phase supporting the template in order. A phase
/// reporting success hands over to the next supporting phase; consumption,
/// failure, or running out of phases ends the message. The end phase then
/// runs exactly once, whatever the outcome.
pub struct PhaseExecutionEngine {
    phases: Vec<Arc<dyn MessageProcessPhase>>,
    end_phase: Arc<dyn MessageProcessPhase>,
    system_exception_handler: Arc<dyn SystemExceptionHandler>,
}

impl PhaseExecutionEngine {
    #[must_use]
    pub fn new(
        phases: Vec<Arc<dyn MessageProcessPhase>>,
        end_phase: Arc<dyn MessageProcessPhase>,
        system_exception_handler: Arc<dyn SystemExceptionHandler>,
    ) -> Self {
        Self {
            phases: sort_phases(phases),
            end_phase,
            system_exception_handler,
        }
    }

    /// Phases in execution order.
    #[must_use]
    pub fn phases(&self) -> &[Arc<dyn MessageProcessPhase>] {
        &self.phases
    }

    /// Copy of this engine with `phase` inserted at its sorted position.
    #[must_use]
    pub fn with_phase(&self, phase: Arc<dyn MessageProcessPhase>) -> Self {
        let mut phases = self.phases.clone();
        insert_sorted(&mut phases, phase);
        Self {
            phases,
            end_phase: Arc::clone(&self.end_phase),
            system_exception_handler: Arc::clone(&self.system_exception_handler),
        }
    }

    /// Processes one message.
    ///
    /// Returns once the message finished, or once its work was handed to the
    /// context's executor.
    ///
    /// # Errors
    ///
    /// [`PhaseError::NoSupportingPhase`] when no phase supports `template`.
    /// The system exception handler is notified and the end phase still runs.
    pub async fn process(
        self: &Arc<Self>,
        template: MessageProcessTemplate,
        context: Arc<MessageProcessContext>,
    ) -> Result<(), PhaseError> {
        let span = info_span!(
            "message",
            source = context.source_id(),
            flow = context.flow_name().as_deref(),
            outcome = tracing::field::Empty,
        );
        let run = Arc::new(PhaseRun {
            engine: Arc::clone(self),
            template,
            context,
            started: Instant::now(),
            ended: AtomicBool::new(false),
            routed: AtomicBool::new(false),
            span: span.clone(),
        });

        if !self.phases.iter().any(|p| p.supports_template(&run.template)) {
            let err = PhaseError::NoSupportingPhase;
            warn!(parent: &span, source = run.context.source_id(), "no phase supports template");
            self.system_exception_handler.handle_exception(&err);
            run.finish(Outcome::Failure).instrument(span).await;
            return Err(err);
        }

        run.run_from(0).instrument(span).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PhaseRun
// ---------------------------------------------------------------------------

/// Per-message state of one pass through the engine.
struct PhaseRun {
    engine: Arc<PhaseExecutionEngine>,
    template: MessageProcessTemplate,
    context: Arc<MessageProcessContext>,
    started: Instant,
    ended: AtomicBool,
    /// Set once a phase other than validation ran.
    routed: AtomicBool,
    span: Span,
}

impl PhaseRun {
    /// Runs the first phase at or after `start` supporting the template, or
    /// finishes the message when there is none. A message that only passed
    /// validation phases finishes as a failure.
    fn run_from(self: Arc<Self>, start: usize) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let next = self.engine.phases[start.min(self.engine.phases.len())..]
                .iter()
                .position(|p| p.supports_template(&self.template))
                .map(|offset| start + offset);

            let Some(index) = next else {
                if self.routed.load(Ordering::SeqCst) {
                    self.finish(Outcome::Success).await;
                } else {
                    let err = PhaseError::NotRouted;
                    warn!(source = self.context.source_id(), "no phase routed the message");
                    self.engine.system_exception_handler.handle_exception(&err);
                    self.finish(Outcome::Failure).await;
                }
                return;
            };

            let phase = Arc::clone(&self.engine.phases[index]);
            if phase.kind() != PhaseKind::Validation {
                self.routed.store(true, Ordering::SeqCst);
            }
            debug!(phase = phase.name(), "running phase");
            let notifier = Arc::new(StepNotifier {
                run: Arc::clone(&self),
                index,
                done: AtomicBool::new(false),
            });
            phase
                .run_phase(&self.template, Arc::clone(&self.context), notifier)
                .await;
        })
    }

    async fn finish(&self, outcome: Outcome) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.span.record("outcome", outcome.label());

        let end = &self.engine.end_phase;
        if end.supports_template(&self.template) {
            end.run_phase(
                &self.template,
                Arc::clone(&self.context),
                Arc::new(EndNotifier {
                    handler: Arc::clone(&self.engine.system_exception_handler),
                }),
            )
            .await;
        }

        metrics::counter!("conveyor_messages_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("conveyor_message_duration_seconds")
            .record(self.started.elapsed().as_secs_f64());
        debug!(outcome = outcome.label(), "message processing ended");
    }
}

/// Notifier handed to the phase at `index`. Acts on the first signal only.
struct StepNotifier {
    run: Arc<PhaseRun>,
    index: usize,
    done: AtomicBool,
}

impl StepNotifier {
    fn first(&self) -> bool {
        let first = !self.done.swap(true, Ordering::SeqCst);
        if !first {
            warn!(
                phase = self.run.engine.phases[self.index].name(),
                "phase reported more than one outcome, ignoring"
            );
        }
        first
    }
}

#[async_trait]
impl PhaseResultNotifier for StepNotifier {
    async fn phase_successfully(&self) {
        if self.first() {
            Arc::clone(&self.run).run_from(self.index + 1).await;
        }
    }

    async fn phase_consumed_message(&self) {
        if self.first() {
            debug!(phase = self.run.engine.phases[self.index].name(), "message consumed");
            self.run.finish(Outcome::Consumed).await;
        }
    }

    async fn phase_failure(&self, error: PhaseError) {
        if self.first() {
            self.run.engine.system_exception_handler.handle_exception(&error);
            self.run.finish(Outcome::Failure).await;
        }
    }
}

/// Notifier for the end phase: nothing runs after it.
struct EndNotifier {
    handler: Arc<dyn SystemExceptionHandler>,
}

#[async_trait]
impl PhaseResultNotifier for EndNotifier {
    async fn phase_successfully(&self) {}

    async fn phase_consumed_message(&self) {}

    async fn phase_failure(&self, error: PhaseError) {
        self.handler.handle_exception(&error);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::processing::phases::EndProcessPhase;
    use crate::testing::StubEnd;

    #[derive(Clone, Copy)]
    enum Reply {
        Success,
        Consume,
        Fail,
        Twice,
    }

    struct Scripted {
        name: &'static str,
        kind: PhaseKind,
        reply: Reply,
        trace: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl MessageProcessPhase for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> PhaseKind {
            self.kind
        }

        fn supports_template(&self, template: &MessageProcessTemplate) -> bool {
            template.end().is_some()
        }

        async fn run_phase(
            &self,
            _template: &MessageProcessTemplate,
            _context: Arc<MessageProcessContext>,
            notifier: Arc<dyn PhaseResultNotifier>,
        ) {
            self.trace.lock().push(self.name);
            match self.reply {
                Reply::Success => notifier.phase_successfully().await,
                Reply::Consume => notifier.phase_consumed_message().await,
                Reply::Fail => {
                    notifier
                        .phase_failure(PhaseError::Template(anyhow::anyhow!("nope")))
                        .await;
                }
                Reply::Twice => {
                    notifier.phase_successfully().await;
                    notifier.phase_successfully().await;
                }
            }
        }
    }

    #[derive(Default)]
    struct CountingSystemHandler {
        seen: Mutex<Vec<String>>,
    }

    impl SystemExceptionHandler for CountingSystemHandler {
        fn handle_exception(&self, error: &PhaseError) {
            self.seen.lock().push(error.to_string());
        }
    }

    struct Fixture {
        trace: Arc<Mutex<Vec<&'static str>>>,
        system: Arc<CountingSystemHandler>,
        end: Arc<StubEnd>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                trace: Arc::default(),
                system: Arc::default(),
                end: Arc::default(),
            }
        }

        fn phase(&self, name: &'static str, kind: PhaseKind, reply: Reply) -> Arc<dyn MessageProcessPhase> {
            Arc::new(Scripted {
                name,
                kind,
                reply,
                trace: Arc::clone(&self.trace),
            })
        }

        fn engine(&self, phases: Vec<Arc<dyn MessageProcessPhase>>) -> Arc<PhaseExecutionEngine> {
            Arc::new(PhaseExecutionEngine::new(
                phases,
                Arc::new(EndProcessPhase),
                self.system.clone(),
            ))
        }

        fn template(&self) -> MessageProcessTemplate {
            MessageProcessTemplate::new().with_end(self.end.clone())
        }
    }

    fn context() -> Arc<MessageProcessContext> {
        Arc::new(MessageProcessContext::new("test"))
    }

    #[tokio::test]
    async fn runs_supporting_phases_in_order_then_end() {
        let f = Fixture::new();
        let engine = f.engine(vec![
            f.phase("route", PhaseKind::FlowProcessing, Reply::Success),
            f.phase("validate", PhaseKind::Validation, Reply::Success),
        ]);

        engine.process(f.template(), context()).await.unwrap();

        assert_eq!(*f.trace.lock(), vec!["validate", "route"]);
        assert_eq!(f.end.ended(), 1);
        assert!(f.system.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn consumed_message_skips_to_end() {
        let f = Fixture::new();
        let engine = f.engine(vec![
            f.phase("validate", PhaseKind::Validation, Reply::Consume),
            f.phase("route", PhaseKind::FlowProcessing, Reply::Success),
        ]);

        engine.process(f.template(), context()).await.unwrap();

        assert_eq!(*f.trace.lock(), vec!["validate"]);
        assert_eq!(f.end.ended(), 1);
    }

    #[tokio::test]
    async fn failure_reaches_system_handler_and_ends() {
        let f = Fixture::new();
        let engine = f.engine(vec![
            f.phase("validate", PhaseKind::Validation, Reply::Fail),
            f.phase("route", PhaseKind::FlowProcessing, Reply::Success),
        ]);

        engine.process(f.template(), context()).await.unwrap();

        assert_eq!(*f.trace.lock(), vec!["validate"]);
        assert_eq!(*f.system.seen.lock(), vec!["nope".to_string()]);
        assert_eq!(f.end.ended(), 1);
    }

    #[tokio::test]
    async fn unsupported_template_is_a_failure() {
        let f = Fixture::new();
        let engine = f.engine(vec![f.phase("route", PhaseKind::FlowProcessing, Reply::Success)]);

        // Without an end capability neither the scripted phase nor the end
        // phase supports the template.
        let err = engine
            .process(MessageProcessTemplate::new(), context())
            .await
            .unwrap_err();

        assert!(matches!(err, PhaseError::NoSupportingPhase));
        assert!(f.trace.lock().is_empty());
        assert_eq!(f.system.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn validation_only_message_is_a_failure() {
        let f = Fixture::new();
        let engine = f.engine(vec![f.phase("validate", PhaseKind::Validation, Reply::Success)]);

        engine.process(f.template(), context()).await.unwrap();

        assert_eq!(*f.trace.lock(), vec!["validate"]);
        assert_eq!(
            *f.system.seen.lock(),
            vec!["no phase routed the message".to_string()]
        );
        assert_eq!(f.end.ended(), 1);
    }

    #[tokio::test]
    async fn repeated_signal_is_ignored() {
        let f = Fixture::new();
        let engine = f.engine(vec![
            f.phase("validate", PhaseKind::Validation, Reply::Twice),
            f.phase("route", PhaseKind::FlowProcessing, Reply::Success),
        ]);

        engine.process(f.template(), context()).await.unwrap();

        assert_eq!(*f.trace.lock(), vec!["validate", "route"]);
        assert_eq!(f.end.ended(), 1);
    }

    #[tokio::test]
    async fn with_phase_keeps_order() {
        let f = Fixture::new();
        let engine = f.engine(vec![f.phase("route", PhaseKind::FlowProcessing, Reply::Success)]);
        let extended = engine.with_phase(f.phase("validate", PhaseKind::Validation, Reply::Success));

        let names: Vec<_> = extended.phases().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["validate", "route"]);
        assert_eq!(engine.phases().len(), 1);
    }
}
