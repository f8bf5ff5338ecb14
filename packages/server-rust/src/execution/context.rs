use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conveyor_core::Event;
use parking_lot::Mutex;

use super::transaction::TransactionScope;

/// State of one template execution.
///
/// Created fresh by every `execute` call and cloned into the interceptors of
/// that call only. Records whether the execution began a transaction and the
/// last event handed to a processor, which is the fallback event for
/// failures raised after a filter dropped the message.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextState>,
}

#[derive(Debug)]
struct ContextState {
    transaction_start: AtomicBool,
    current_event: Mutex<Option<Event>>,
    transactions: TransactionScope,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(transactions: TransactionScope) -> Self {
        Self {
            inner: Arc::new(ContextState {
                transaction_start: AtomicBool::new(false),
                current_event: Mutex::new(None),
                transactions,
            }),
        }
    }

    /// Records that this execution began the bound transaction.
    pub fn mark_transaction_start(&self) {
        self.inner.transaction_start.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if this execution began a transaction and is therefore
    /// responsible for resolving it.
    #[must_use]
    pub fn needs_transaction_resolution(&self) -> bool {
        self.inner.transaction_start.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn transactions(&self) -> &TransactionScope {
        &self.inner.transactions
    }

    #[must_use]
    pub fn current_event(&self) -> Option<Event> {
        self.inner.current_event.lock().clone()
    }

    pub fn set_current_event(&self, event: Event) {
        *self.inner.current_event.lock() = Some(event);
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(TransactionScope::new())
    }
}
