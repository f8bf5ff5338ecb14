//! Processors that open a nested execution: flow references, transactional
//! scopes and try scopes.

use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::Event;

use super::construct::run_chain;
use super::registry::FlowRegistry;
use crate::execution::{
    ErrorHandlingExecutionTemplate, ExecutionCallback, ExecutionContext, ExecutionError,
    ExecutionResult, ExecutionTemplate, TransactionConfig,
    TransactionalErrorHandlingExecutionTemplate, TransactionalExecutionTemplate,
};
use crate::traits::{EventProcessor, MessagingExceptionHandler};

type Chain = Arc<Vec<Arc<dyn EventProcessor>>>;

fn chain_callback(processors: Chain, event: Event) -> ExecutionCallback {
    ExecutionCallback::new(move |ctx| async move { run_chain(&processors, event, &ctx).await })
}

// ---------------------------------------------------------------------------
// FlowRef
// ---------------------------------------------------------------------------

/// Invokes another flow by name, inside a scope execution template built
/// around that flow's exception strategy. The flow is looked up on every
/// call, so it may be registered after the reference is created.
pub struct FlowRef {
    target: String,
    registry: Arc<FlowRegistry>,
}

impl FlowRef {
    #[must_use]
    pub fn new(target: impl Into<String>, registry: Arc<FlowRegistry>) -> Self {
        Self {
            target: target.into(),
            registry,
        }
    }
}

#[async_trait]
impl EventProcessor for FlowRef {
    fn name(&self) -> &str {
        &self.target
    }

    async fn process(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult {
        let flow = self
            .registry
            .get(&self.target)
            .map_err(|err| ExecutionError::Fatal(err.into()))?;
        let template = TransactionalErrorHandlingExecutionTemplate::create_scope_execution_template(
            TransactionConfig::default(),
            flow.exception_handler(),
        );
        let callback =
            ExecutionCallback::new(move |inner| async move { flow.process(event, &inner).await });
        template.execute_in_scope(ctx.transactions(), callback).await
    }
}

// ---------------------------------------------------------------------------
// TransactionalScope
// ---------------------------------------------------------------------------

/// Runs nested processors under their own transaction config. Exceptions are
/// left to the enclosing flow's strategy.
pub struct TransactionalScope {
    name: String,
    processors: Chain,
    template: TransactionalExecutionTemplate,
}

impl TransactionalScope {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: TransactionConfig,
        processors: Vec<Arc<dyn EventProcessor>>,
    ) -> Self {
        Self {
            name: name.into(),
            processors: Arc::new(processors),
            template: TransactionalExecutionTemplate::create_transactional_execution_template(config),
        }
    }
}

#[async_trait]
impl EventProcessor for TransactionalScope {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult {
        let callback = chain_callback(Arc::clone(&self.processors), event);
        self.template.execute_in_scope(ctx.transactions(), callback).await
    }
}

// ---------------------------------------------------------------------------
// TryScope
// ---------------------------------------------------------------------------

/// Runs nested processors with their own exception strategy.
pub struct TryScope {
    name: String,
    processors: Chain,
    template: ErrorHandlingExecutionTemplate,
}

impl TryScope {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        processors: Vec<Arc<dyn EventProcessor>>,
        handler: Arc<dyn MessagingExceptionHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            processors: Arc::new(processors),
            template: ErrorHandlingExecutionTemplate::create_error_handling_execution_template(handler),
        }
    }
}

#[async_trait]
impl EventProcessor for TryScope {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, event: Event, ctx: &ExecutionContext) -> ExecutionResult {
        let callback = chain_callback(Arc::clone(&self.processors), event);
        self.template.execute_in_scope(ctx.transactions(), callback).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
