//! Exception strategies for flows.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use conveyor_core::{Event, MessagingException};
use tracing::{debug, warn};

use super::construct::run_chain;
use crate::execution::ExecutionContext;
use crate::traits::{EventProcessor, MessagingExceptionHandler};

// ---------------------------------------------------------------------------
// ContinueErrorHandler
// ---------------------------------------------------------------------------

/// Recovers from failures: runs its processors on the failed event, marks the
/// exception handled and commits a transaction the failing execution began.
/// The flow's caller receives the recovery event as an ordinary result.
#[derive(Default)]
pub struct ContinueErrorHandler {
    processors: Vec<Arc<dyn EventProcessor>>,
}

impl ContinueErrorHandler {
    #[must_use]
    pub fn new(processors: Vec<Arc<dyn EventProcessor>>) -> Self {
        Self { processors }
    }
}

#[async_trait]
impl MessagingExceptionHandler for ContinueErrorHandler {
    async fn handle_exception(
        &self,
        exception: &mut MessagingException,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Event> {
        debug!(error = %exception, "continuing after failure");
        let failed = exception.event_with_error();
        let recovered = run_chain(&self.processors, failed.clone(), ctx)
            .await
            .context("on-error-continue processors failed")?
            .unwrap_or(failed);
        exception.set_handled(true);

        if ctx.needs_transaction_resolution() {
            ctx.transactions()
                .resolve()
                .await
                .context("failed to commit transaction after recovery")?;
        }
        Ok(recovered.without_error())
    }
}

// ---------------------------------------------------------------------------
// PropagateErrorHandler
// ---------------------------------------------------------------------------

/// Default strategy of a flow. Rolls back the bound transaction, runs its
/// processors for side effects, and leaves the exception unhandled so it
/// reaches the caller.
#[derive(Default)]
pub struct PropagateErrorHandler {
    processors: Vec<Arc<dyn EventProcessor>>,
}

impl PropagateErrorHandler {
    #[must_use]
    pub fn new(processors: Vec<Arc<dyn EventProcessor>>) -> Self {
        Self { processors }
    }
}

#[async_trait]
impl MessagingExceptionHandler for PropagateErrorHandler {
    async fn handle_exception(
        &self,
        exception: &mut MessagingException,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Event> {
        if let Some(tx) = ctx.transactions().transaction() {
            debug!(tx = %tx.id(), "marking transaction rollback-only");
            tx.set_rollback_only();
            if ctx.needs_transaction_resolution() {
                if let Err(err) = ctx.transactions().resolve().await {
                    warn!(error = %err, "failed to roll back transaction");
                }
            }
        }

        let failed = exception.event_with_error();
        let processed = run_chain(&self.processors, failed.clone(), ctx)
            .await
            .context("on-error-propagate processors failed")?
            .unwrap_or(failed);
        exception.set_handled(false);
        Ok(processed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
