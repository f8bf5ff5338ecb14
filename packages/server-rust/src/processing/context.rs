use std::fmt;
use std::sync::Arc;

use crate::execution::TransactionConfig;
use crate::flow::{FlowConstruct, PropagateErrorHandler};
use crate::traits::{MessagingExceptionHandler, WorkExecutor};

/// Per-message metadata supplied by the message source. Read-only once
/// built.
#[derive(Clone)]
pub struct MessageProcessContext {
    source_id: String,
    flow: Option<Arc<FlowConstruct>>,
    transaction_config: TransactionConfig,
    executor: Option<Arc<dyn WorkExecutor>>,
}

impl MessageProcessContext {
    #[must_use]
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            flow: None,
            transaction_config: TransactionConfig::default(),
            executor: None,
        }
    }

    #[must_use]
    pub fn with_flow(mut self, flow: Arc<FlowConstruct>) -> Self {
        self.flow = Some(flow);
        self
    }

    #[must_use]
    pub fn with_transaction_config(mut self, config: TransactionConfig) -> Self {
        self.transaction_config = config;
        self
    }

    /// Processes messages asynchronously on `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn WorkExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    #[must_use]
    pub fn flow(&self) -> Option<&Arc<FlowConstruct>> {
        self.flow.as_ref()
    }

    #[must_use]
    pub fn flow_name(&self) -> Option<String> {
        self.flow.as_ref().map(|flow| flow.name().to_string())
    }

    #[must_use]
    pub fn transaction_config(&self) -> &TransactionConfig {
        &self.transaction_config
    }

    #[must_use]
    pub fn executor(&self) -> Option<&Arc<dyn WorkExecutor>> {
        self.executor.as_ref()
    }

    #[must_use]
    pub fn supports_asynchronous_processing(&self) -> bool {
        self.executor.is_some()
    }

    /// The owning flow's exception strategy, or [`PropagateErrorHandler`]
    /// for messages without a flow.
    #[must_use]
    pub fn exception_handler(&self) -> Arc<dyn MessagingExceptionHandler> {
        match &self.flow {
            Some(flow) => flow.exception_handler(),
            None => Arc::new(PropagateErrorHandler::default()),
        }
    }
}

impl fmt::Debug for MessageProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProcessContext")
            .field("source_id", &self.source_id)
            .field("flow", &self.flow_name())
            .field("transaction_config", &self.transaction_config)
            .field("async", &self.supports_asynchronous_processing())
            .finish()
    }
}
