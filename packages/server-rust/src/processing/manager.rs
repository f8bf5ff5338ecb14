//! Process-wide entry point for inbound messages.

use std::sync::Arc;

use arc_swap::ArcSwap;
use conveyor_core::NotificationListener;
use tracing::info;

use super::config::ProcessingConfig;
use super::context::MessageProcessContext;
use super::engine::PhaseExecutionEngine;
use super::error::PhaseError;
use super::notification::NotificationManager;
use super::phase::MessageProcessPhase;
use super::phases::{
    AsyncResponseFlowProcessingPhase, EndProcessPhase, ExtensionFlowProcessingPhase,
    FlowProcessingPhase, ModuleFlowProcessingPhase, ValidationPhase,
};
use super::policy::{NoPolicyManager, PolicyManager};
use super::template::MessageProcessTemplate;
use crate::traits::{LoggingSystemExceptionHandler, SystemExceptionHandler};

/// Submits messages to the phase engine.
///
/// The engine is immutable; [`register_phase`](Self::register_phase) builds a
/// new one and swaps it in, so messages already in progress keep the phase
/// list they started with.
pub struct MessageProcessingManager {
    engine: ArcSwap<PhaseExecutionEngine>,
    notifications: Arc<NotificationManager>,
    config: ProcessingConfig,
}

impl MessageProcessingManager {
    #[must_use]
    pub fn builder() -> MessageProcessingManagerBuilder {
        MessageProcessingManagerBuilder::default()
    }

    /// Runs one message through the phases supporting `template`.
    ///
    /// Returns when the message finished, or as soon as its work was handed to
    /// the context's executor.
    ///
    /// # Errors
    ///
    /// [`PhaseError::NoSupportingPhase`] when no registered phase supports
    /// `template`.
    pub async fn process_message(
        &self,
        template: MessageProcessTemplate,
        context: MessageProcessContext,
    ) -> Result<(), PhaseError> {
        let engine = self.engine.load_full();
        engine.process(template, Arc::new(context)).await
    }

    /// Adds `phase` at its sorted position for all later messages.
    pub fn register_phase(&self, phase: Arc<dyn MessageProcessPhase>) {
        let name = phase.name().to_string();
        self.engine.rcu(|current| current.with_phase(Arc::clone(&phase)));
        info!(phase = %name, "registered message process phase");
    }

    /// Names of the registered phases in execution order.
    #[must_use]
    pub fn phase_names(&self) -> Vec<String> {
        self.engine
            .load()
            .phases()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationManager> {
        &self.notifications
    }

    #[must_use]
    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MessageProcessingManagerBuilder {
    config: ProcessingConfig,
    listeners: Vec<Arc<dyn NotificationListener>>,
    policies: Option<Arc<dyn PolicyManager>>,
    system_exception_handler: Option<Arc<dyn SystemExceptionHandler>>,
    phases: Vec<Arc<dyn MessageProcessPhase>>,
}

impl MessageProcessingManagerBuilder {
    #[must_use]
    pub fn with_config(mut self, config: ProcessingConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_notification_listener(mut self, listener: Arc<dyn NotificationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Policy manager of the extension and module phases. Defaults to
    /// [`NoPolicyManager`].
    #[must_use]
    pub fn with_policy_manager(mut self, policies: Arc<dyn PolicyManager>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Receives phase failures. Defaults to [`LoggingSystemExceptionHandler`].
    #[must_use]
    pub fn with_system_exception_handler(mut self, handler: Arc<dyn SystemExceptionHandler>) -> Self {
        self.system_exception_handler = Some(handler);
        self
    }

    /// Registers a phase next to the built-in ones.
    #[must_use]
    pub fn with_phase(mut self, phase: Arc<dyn MessageProcessPhase>) -> Self {
        self.phases.push(phase);
        self
    }

    #[must_use]
    pub fn build(self) -> MessageProcessingManager {
        let notifications = Arc::new(NotificationManager::new(self.config.notifications_enabled));
        for listener in self.listeners {
            notifications.add_listener(listener);
        }
        let policies: Arc<dyn PolicyManager> = match self.policies {
            Some(policies) => policies,
            None => Arc::new(NoPolicyManager),
        };
        let system_exception_handler: Arc<dyn SystemExceptionHandler> =
            match self.system_exception_handler {
                Some(handler) => handler,
                None => Arc::new(LoggingSystemExceptionHandler),
            };

        let mut phases: Vec<Arc<dyn MessageProcessPhase>> = vec![
            Arc::new(ValidationPhase),
            Arc::new(FlowProcessingPhase::new(Arc::clone(&notifications))),
            Arc::new(AsyncResponseFlowProcessingPhase::new(Arc::clone(&notifications))),
            Arc::new(ExtensionFlowProcessingPhase::new(
                Arc::clone(&notifications),
                Arc::clone(&policies),
            )),
            Arc::new(ModuleFlowProcessingPhase::new(
                Arc::clone(&notifications),
                policies,
            )),
        ];
        phases.extend(self.phases);

        let engine = PhaseExecutionEngine::new(
            phases,
            Arc::new(EndProcessPhase),
            system_exception_handler,
        );
        MessageProcessingManager {
            engine: ArcSwap::from_pointee(engine),
            notifications,
            config: self.config,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
