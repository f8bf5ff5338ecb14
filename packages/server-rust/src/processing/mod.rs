//! Phased message processing.
//!
//! A transport wraps each inbound message in a [`MessageProcessTemplate`]
//! (what the source can do) and a [`MessageProcessContext`] (where it comes
//! from and how to run it), then hands both to the
//! [`MessageProcessingManager`]. The [`PhaseExecutionEngine`] runs every phase
//! supporting the template, then the end phase.

pub mod completion;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod manager;
pub mod notification;
pub mod phase;
pub mod phases;
pub mod policy;
pub mod template;
pub mod worker;

pub use completion::{
    Blocking, BlockingCompletionHandler, CompletionHandler, ExceptionCallback,
    ResponseCompletionCallback,
};
pub use config::ProcessingConfig;
pub use context::MessageProcessContext;
pub use engine::PhaseExecutionEngine;
pub use error::{CompletionError, PhaseError, WorkRejected};
pub use executor::{TokioExecutor, WorkerPool};
pub use manager::{MessageProcessingManager, MessageProcessingManagerBuilder};
pub use notification::NotificationManager;
pub use phase::{MessageProcessPhase, PhaseKind, PhaseResultNotifier};
pub use policy::{
    flow_execution, CompositeSourcePolicy, DefaultPolicyManager, FlowExecution, NoPolicyManager,
    PolicyManager, ResponseParameterProvider, SourcePolicy, SourcePolicyFailure,
    SourcePolicyStage, SourcePolicySuccess, TemplateParameters,
};
pub use template::{
    AsyncResponseFlowProcessingPhaseTemplate, EndPhaseTemplate,
    ExtensionFlowProcessingPhaseTemplate, FlowProcessingPhaseTemplate, FlowTemplate,
    MessageProcessTemplate, ModuleFlowProcessingPhaseTemplate, PhaseOutcome,
    RequestResponseFlowProcessingPhaseTemplate, ResponseParameters, SourceFlowTemplate,
    ValidationPhaseTemplate,
};
