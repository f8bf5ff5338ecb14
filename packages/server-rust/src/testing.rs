//! Shared test doubles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_core::{
    ConnectorAction, ConnectorMessageNotification, Event, MessagingException, NotificationListener,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::execution::{ExecutionCallback, ExecutionContext, ExecutionError, ExecutionResult};
use crate::flow::{processor_fn, FlowConstruct};
use crate::processing::error::PhaseError;
use crate::processing::phase::PhaseResultNotifier;
use crate::processing::template::{
    EndPhaseTemplate, FlowProcessingPhaseTemplate, RequestResponseFlowProcessingPhaseTemplate,
};
use crate::traits::{EventProcessor, MessagingExceptionHandler};

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

pub fn ok_callback(event: Event) -> ExecutionCallback {
    ExecutionCallback::new(move |_| async move { Ok(Some(event)) })
}

/// Callback raising an unhandled messaging exception on a `"failed"` event.
pub fn failing_callback(message: &str) -> ExecutionCallback {
    let message = message.to_string();
    ExecutionCallback::new(move |_| async move {
        Err(ExecutionError::messaging(message, Event::new("failed")))
    })
}

pub fn fatal_callback(message: &str) -> ExecutionCallback {
    let message = message.to_string();
    ExecutionCallback::new(move |_| async move { Err(ExecutionError::Fatal(anyhow::anyhow!(message))) })
}

// ---------------------------------------------------------------------------
// RecordingExceptionHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerMode {
    Handle,
    Propagate,
    Fail,
}

/// Exception strategy that counts invocations. Handling and propagating
/// strategies both answer with the failed event's payload replaced by
/// `"recovered"`.
#[derive(Debug)]
pub struct RecordingExceptionHandler {
    mode: HandlerMode,
    calls: AtomicUsize,
}

impl RecordingExceptionHandler {
    fn with_mode(mode: HandlerMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn handling() -> Self {
        Self::with_mode(HandlerMode::Handle)
    }

    pub fn propagating() -> Self {
        Self::with_mode(HandlerMode::Propagate)
    }

    pub fn failing() -> Self {
        Self::with_mode(HandlerMode::Fail)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingExceptionHandler for RecordingExceptionHandler {
    async fn handle_exception(
        &self,
        exception: &mut MessagingException,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<Event> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            HandlerMode::Handle => {
                exception.set_handled(true);
                Ok(exception.event().with_payload("recovered"))
            }
            HandlerMode::Propagate => Ok(exception.event().with_payload("recovered")),
            HandlerMode::Fail => Err(anyhow::anyhow!("strategy exploded")),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Terminal signal observed by a [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Success,
    Consumed,
    Failure(String),
}

/// Phase result notifier that records every signal it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    signals: Mutex<Vec<Signal>>,
    notify: Notify,
}

impl RecordingNotifier {
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }

    fn record(&self, signal: Signal) {
        self.signals.lock().push(signal);
        self.notify.notify_waiters();
    }

    /// Waits until at least `count` signals arrived. Panics after five seconds.
    pub async fn wait_for(&self, count: usize) -> Vec<Signal> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.signals.lock().len() >= count {
                    return self.signals();
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for phase signals")
    }
}

#[async_trait]
impl PhaseResultNotifier for RecordingNotifier {
    async fn phase_successfully(&self) {
        self.record(Signal::Success);
    }

    async fn phase_consumed_message(&self) {
        self.record(Signal::Consumed);
    }

    async fn phase_failure(&self, error: PhaseError) {
        self.record(Signal::Failure(error.to_string()));
    }
}

// ---------------------------------------------------------------------------
// RecordingListener
// ---------------------------------------------------------------------------

/// Notification listener keeping every notification it saw.
#[derive(Debug, Default)]
pub struct RecordingListener {
    seen: Mutex<Vec<ConnectorMessageNotification>>,
}

impl RecordingListener {
    pub fn actions(&self) -> Vec<ConnectorAction> {
        self.seen.lock().iter().map(|n| n.action).collect()
    }

    pub fn notifications(&self) -> Vec<ConnectorMessageNotification> {
        self.seen.lock().clone()
    }
}

impl NotificationListener for RecordingListener {
    fn on_notification(&self, notification: &ConnectorMessageNotification) {
        self.seen.lock().push(notification.clone());
    }
}

// ---------------------------------------------------------------------------
// Message sources
// ---------------------------------------------------------------------------

/// Request/response source routing one event through a flow and logging
/// every response and hook call.
pub struct StubFlowSource {
    event: Event,
    flow: Arc<FlowConstruct>,
    respond: bool,
    fail_response: bool,
    log: Mutex<Vec<String>>,
}

impl StubFlowSource {
    pub fn new(payload: &str, flow: Arc<FlowConstruct>) -> Self {
        Self {
            event: Event::new(payload),
            flow,
            respond: true,
            fail_response: false,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Source without the response capability.
    pub fn one_way(mut self) -> Self {
        self.respond = false;
        self
    }

    /// Source whose (successful) responses cannot be sent.
    pub fn failing_responses(mut self) -> Self {
        self.fail_response = true;
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn push(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

fn describe(event: Option<&Event>) -> String {
    event
        .and_then(|e| e.payload().as_str().map(str::to_string))
        .unwrap_or_else(|| "none".to_string())
}

#[async_trait]
impl FlowProcessingPhaseTemplate for StubFlowSource {
    async fn get_event(&self) -> Result<Event, ExecutionError> {
        Ok(self.event.clone())
    }

    async fn route_event(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult {
        self.flow.process(event, ctx).await
    }

    async fn after_successful_processing_flow(&self, result: Option<&Event>) -> anyhow::Result<()> {
        self.push(format!("after-success:{}", describe(result)));
        Ok(())
    }

    async fn after_failure_processing_flow(&self, _error: &ExecutionError) -> anyhow::Result<()> {
        self.push("after-failure".to_string());
        Ok(())
    }

    fn as_request_response(&self) -> Option<&dyn RequestResponseFlowProcessingPhaseTemplate> {
        if self.respond {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl RequestResponseFlowProcessingPhaseTemplate for StubFlowSource {
    async fn send_response_to_client(&self, response: Option<&Event>) -> anyhow::Result<()> {
        self.push(format!("response:{}", describe(response)));
        if self.fail_response {
            anyhow::bail!("connection reset");
        }
        Ok(())
    }

    async fn send_failure_response_to_client(
        &self,
        exception: &MessagingException,
    ) -> anyhow::Result<()> {
        self.push(format!("failure-response:{}", exception.message()));
        Ok(())
    }
}

/// End-phase capability counting how many messages ended.
#[derive(Debug, Default)]
pub struct StubEnd {
    ended: AtomicUsize,
    notify: Notify,
}

impl StubEnd {
    pub fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }

    /// Waits until `count` messages ended. Panics after five seconds.
    pub async fn wait_for(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.ended() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for end phase");
    }
}

#[async_trait]
impl EndPhaseTemplate for StubEnd {
    async fn message_processing_ended(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Processor that always raises a messaging exception.
pub fn failing_processor(name: &'static str) -> Arc<dyn EventProcessor> {
    processor_fn(name, |event| async move {
        Err(ExecutionError::messaging("processor failed", event))
    })
}

/// Processor replacing the payload with `payload`.
pub fn set_payload(name: &'static str, payload: &'static str) -> Arc<dyn EventProcessor> {
    processor_fn(name, move |event: Event| async move { Ok(Some(event.with_payload(payload))) })
}
