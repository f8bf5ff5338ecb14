//! What a message source can do, expressed as a set of capabilities that
//! phases select on.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::{Event, MessagingException, Value};

use super::completion::{CompletionHandler, ResponseCompletionCallback};
use crate::execution::{ExecutionContext, ExecutionError, ExecutionResult};

/// Transport-specific parameters of a response, such as status codes.
pub type ResponseParameters = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ValidationPhaseTemplate: Send + Sync {
    fn validate_message(&self) -> bool;

    /// Drops a message that failed validation.
    async fn discard_invalid_message(&self) -> anyhow::Result<()>;
}

/// Classic request/optional-response routing.
#[async_trait]
pub trait FlowProcessingPhaseTemplate: Send + Sync {
    /// Builds the inbound event.
    async fn get_event(&self) -> Result<Event, ExecutionError>;

    async fn before_route_event(&self, event: Event) -> Result<Event, ExecutionError> {
        Ok(event)
    }

    async fn route_event(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult;

    async fn after_route_event(
        &self,
        result: Option<Event>,
    ) -> Result<Option<Event>, ExecutionError> {
        Ok(result)
    }

    async fn after_successful_processing_flow(&self, _result: Option<&Event>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_failure_processing_flow(&self, _error: &ExecutionError) -> anyhow::Result<()> {
        Ok(())
    }

    /// The response capability, for sources that answer their requests.
    fn as_request_response(&self) -> Option<&dyn RequestResponseFlowProcessingPhaseTemplate> {
        None
    }
}

#[async_trait]
pub trait RequestResponseFlowProcessingPhaseTemplate: Send + Sync {
    async fn send_response_to_client(&self, response: Option<&Event>) -> anyhow::Result<()>;

    async fn send_failure_response_to_client(
        &self,
        exception: &MessagingException,
    ) -> anyhow::Result<()>;
}

/// Routing whose response is written later; the source reports the outcome
/// through the supplied callback.
#[async_trait]
pub trait AsyncResponseFlowProcessingPhaseTemplate: Send + Sync {
    async fn get_event(&self) -> Result<Event, ExecutionError>;

    async fn route_event(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult;

    async fn send_response_to_client(
        &self,
        response: Option<Event>,
        callback: Arc<dyn ResponseCompletionCallback>,
    );

    async fn send_failure_response_to_client(
        &self,
        exception: MessagingException,
        callback: Arc<dyn ResponseCompletionCallback>,
    );
}

/// Common part of policy-wrapped sources.
#[async_trait]
pub trait SourceFlowTemplate: Send + Sync {
    async fn get_event(&self) -> Result<Event, ExecutionError>;

    async fn route_event(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult;

    fn success_response_parameters(&self, _event: &Event) -> ResponseParameters {
        ResponseParameters::new()
    }

    fn failure_response_parameters(&self, _event: &Event) -> ResponseParameters {
        ResponseParameters::new()
    }
}

/// Extension sources report response outcomes through a
/// [`ResponseCompletionCallback`].
#[async_trait]
pub trait ExtensionFlowProcessingPhaseTemplate: SourceFlowTemplate {
    async fn send_response_to_client(
        &self,
        response: Event,
        parameters: ResponseParameters,
        callback: Arc<dyn ResponseCompletionCallback>,
    );

    async fn send_failure_response_to_client(
        &self,
        exception: MessagingException,
        parameters: ResponseParameters,
        callback: Arc<dyn ResponseCompletionCallback>,
    );
}

/// Outcome handed to [`ModuleFlowProcessingPhaseTemplate::after_phase_execution`].
#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    Success(Event),
    Failure { event: Option<Event>, error: String },
}

/// Module sources report response outcomes through a [`CompletionHandler`].
#[async_trait]
pub trait ModuleFlowProcessingPhaseTemplate: SourceFlowTemplate {
    async fn send_response_to_client(
        &self,
        response: Event,
        parameters: ResponseParameters,
        handler: Box<dyn CompletionHandler<(), anyhow::Error>>,
    );

    async fn send_failure_response_to_client(
        &self,
        exception: MessagingException,
        parameters: ResponseParameters,
        handler: Box<dyn CompletionHandler<(), anyhow::Error>>,
    );

    /// Called once the phase outcome is known, after any response completed.
    async fn after_phase_execution(&self, _outcome: PhaseOutcome) {}
}

#[async_trait]
pub trait EndPhaseTemplate: Send + Sync {
    async fn message_processing_ended(&self);
}

// ---------------------------------------------------------------------------
// MessageProcessTemplate
// ---------------------------------------------------------------------------

/// The flow-processing style a source uses. A template has at most one.
#[derive(Clone)]
pub enum FlowTemplate {
    Flow(Arc<dyn FlowProcessingPhaseTemplate>),
    AsyncResponse(Arc<dyn AsyncResponseFlowProcessingPhaseTemplate>),
    Extension(Arc<dyn ExtensionFlowProcessingPhaseTemplate>),
    Module(Arc<dyn ModuleFlowProcessingPhaseTemplate>),
}

impl FlowTemplate {
    fn style(&self) -> &'static str {
        match self {
            Self::Flow(_) => "flow",
            Self::AsyncResponse(_) => "async-response",
            Self::Extension(_) => "extension",
            Self::Module(_) => "module",
        }
    }
}

/// Capability set of one message source. Built by the source and handed to
/// the manager with every message; phases pick the capabilities they need.
///
/// Capabilities beyond the built-in ones are stored by type, for phases
/// registered from outside this crate.
#[derive(Clone, Default)]
pub struct MessageProcessTemplate {
    validation: Option<Arc<dyn ValidationPhaseTemplate>>,
    flow: Option<FlowTemplate>,
    end: Option<Arc<dyn EndPhaseTemplate>>,
    capabilities: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl MessageProcessTemplate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_validation(mut self, validation: Arc<dyn ValidationPhaseTemplate>) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Sets the flow-processing style, replacing any previous one.
    #[must_use]
    pub fn with_flow(mut self, flow: FlowTemplate) -> Self {
        self.flow = Some(flow);
        self
    }

    #[must_use]
    pub fn with_end(mut self, end: Arc<dyn EndPhaseTemplate>) -> Self {
        self.end = Some(end);
        self
    }

    /// Adds a custom capability, retrievable with [`capability`](Self::capability).
    #[must_use]
    pub fn with_capability<T>(mut self, capability: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.capabilities
            .insert(TypeId::of::<Arc<T>>(), Arc::new(capability));
        self
    }

    #[must_use]
    pub fn validation(&self) -> Option<&Arc<dyn ValidationPhaseTemplate>> {
        self.validation.as_ref()
    }

    #[must_use]
    pub fn flow(&self) -> Option<&FlowTemplate> {
        self.flow.as_ref()
    }

    #[must_use]
    pub fn end(&self) -> Option<&Arc<dyn EndPhaseTemplate>> {
        self.end.as_ref()
    }

    #[must_use]
    pub fn capability<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.capabilities
            .get(&TypeId::of::<Arc<T>>())
            .and_then(|stored| stored.downcast_ref::<Arc<T>>())
            .cloned()
    }
}

impl fmt::Debug for MessageProcessTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProcessTemplate")
            .field("validation", &self.validation.is_some())
            .field("flow", &self.flow.as_ref().map(FlowTemplate::style))
            .field("end", &self.end.is_some())
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}
