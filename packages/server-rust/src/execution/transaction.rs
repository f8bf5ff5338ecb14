//! Transaction model and the explicit transaction scope.
//!
//! A [`TransactionScope`] replaces an ambient, thread-bound transaction: it is
//! created once per inbound message and handed to every execution that works
//! on that message, so nested executions see the transaction bound by their
//! callers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::TransactionError;

// ---------------------------------------------------------------------------
// TransactionAction / TransactionConfig
// ---------------------------------------------------------------------------

/// What an execution must do about transactions before running its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionAction {
    /// Run without a transaction; resolve one left bound by a previous step.
    None,
    /// Always begin a new transaction.
    AlwaysBegin,
    /// Begin a transaction unless one is already bound.
    BeginOrJoin,
    /// Join the bound transaction; fail if there is none.
    AlwaysJoin,
    /// Join the bound transaction if there is one.
    JoinIfPossible,
    /// Fail if a transaction is bound.
    Never,
    /// Run outside any bound transaction, detaching it for the duration.
    NotSupported,
    /// Leave the transactional state alone.
    #[default]
    Indifferent,
}

/// Transactional behaviour of one execution.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    pub action: TransactionAction,
    /// Timeout passed to the factory when a transaction is begun.
    pub timeout: Option<Duration>,
    pub factory: Option<Arc<dyn TransactionFactory>>,
    /// Join a transaction managed outside this process when none is bound.
    pub interact_with_external: bool,
    /// Reject `AlwaysBegin` while another transaction is bound instead of
    /// resolving the previous one.
    pub strict_isolation: bool,
}

impl TransactionConfig {
    #[must_use]
    pub fn new(action: TransactionAction) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn TransactionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn interacting_with_external(mut self) -> Self {
        self.interact_with_external = true;
        self
    }

    #[must_use]
    pub fn strictly_isolated(mut self) -> Self {
        self.strict_isolation = true;
        self
    }

    /// Returns `true` if the action may begin or join a transaction.
    #[must_use]
    pub fn is_transacted(&self) -> bool {
        matches!(
            self.action,
            TransactionAction::AlwaysBegin
                | TransactionAction::BeginOrJoin
                | TransactionAction::AlwaysJoin
                | TransactionAction::JoinIfPossible
        )
    }
}

// ---------------------------------------------------------------------------
// Transaction traits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Active,
    MarkedRollback,
    Committed,
    RolledBack,
    Suspended,
}

/// A unit of transactional work against some resource.
#[async_trait]
pub trait Transaction: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Returns `true` for distributed (XA) transactions, which can be
    /// suspended and resumed.
    fn is_xa(&self) -> bool;

    fn status(&self) -> TransactionStatus;

    /// Marks the transaction so that resolving it rolls it back.
    fn set_rollback_only(&self);

    fn is_rollback_only(&self) -> bool;

    async fn commit(&self) -> Result<(), TransactionError>;

    async fn rollback(&self) -> Result<(), TransactionError>;

    async fn suspend(&self) -> Result<(), TransactionError>;

    async fn resume(&self) -> Result<(), TransactionError>;
}

/// Creates transactions for a [`TransactionConfig`].
#[async_trait]
pub trait TransactionFactory: Send + Sync + fmt::Debug {
    async fn begin_transaction(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Arc<dyn Transaction>, TransactionError>;

    /// Returns the external-transaction capability, if this factory has one.
    fn as_external_aware(&self) -> Option<&dyn ExternalTransactionAwareFactory> {
        None
    }
}

/// Factory capability for joining a transaction started outside this process.
#[async_trait]
pub trait ExternalTransactionAwareFactory: Send + Sync {
    /// Returns the external transaction, or `None` if there is none to join.
    async fn join_external_transaction(
        &self,
    ) -> Result<Option<Arc<dyn Transaction>>, TransactionError>;
}

// ---------------------------------------------------------------------------
// LocalTransaction
// ---------------------------------------------------------------------------

/// In-memory transaction that only tracks its own status.
#[derive(Debug)]
pub struct LocalTransaction {
    id: String,
    xa: bool,
    status: Mutex<TransactionStatus>,
    rollback_only: AtomicBool,
}

impl LocalTransaction {
    #[must_use]
    pub fn new(id: impl Into<String>, xa: bool) -> Self {
        Self {
            id: id.into(),
            xa,
            status: Mutex::new(TransactionStatus::Active),
            rollback_only: AtomicBool::new(false),
        }
    }

    fn transition(
        &self,
        allowed: &[TransactionStatus],
        to: TransactionStatus,
    ) -> Result<(), TransactionError> {
        let mut status = self.status.lock();
        if !allowed.contains(&*status) {
            return Err(TransactionError::NotActive {
                id: self.id.clone(),
                status: *status,
            });
        }
        trace!(tx = %self.id, from = ?*status, to = ?to, "transaction status change");
        *status = to;
        Ok(())
    }
}

#[async_trait]
impl Transaction for LocalTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_xa(&self) -> bool {
        self.xa
    }

    fn status(&self) -> TransactionStatus {
        let status = *self.status.lock();
        if status == TransactionStatus::Active && self.is_rollback_only() {
            TransactionStatus::MarkedRollback
        } else {
            status
        }
    }

    fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    async fn commit(&self) -> Result<(), TransactionError> {
        if self.is_rollback_only() {
            return Err(TransactionError::NotActive {
                id: self.id.clone(),
                status: TransactionStatus::MarkedRollback,
            });
        }
        self.transition(&[TransactionStatus::Active], TransactionStatus::Committed)
    }

    async fn rollback(&self) -> Result<(), TransactionError> {
        self.transition(
            &[TransactionStatus::Active, TransactionStatus::Suspended],
            TransactionStatus::RolledBack,
        )
    }

    async fn suspend(&self) -> Result<(), TransactionError> {
        self.transition(&[TransactionStatus::Active], TransactionStatus::Suspended)
    }

    async fn resume(&self) -> Result<(), TransactionError> {
        self.transition(&[TransactionStatus::Suspended], TransactionStatus::Active)
    }
}

// ---------------------------------------------------------------------------
// LocalTransactionFactory
// ---------------------------------------------------------------------------

/// Factory for [`LocalTransaction`]s. Keeps every transaction it began so
/// callers can inspect their final status.
#[derive(Debug, Default)]
pub struct LocalTransactionFactory {
    xa: bool,
    next_id: AtomicU64,
    begun: Mutex<Vec<Arc<LocalTransaction>>>,
    external: Option<Arc<LocalTransaction>>,
}

impl LocalTransactionFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose transactions are XA.
    #[must_use]
    pub fn xa() -> Self {
        Self {
            xa: true,
            ..Self::default()
        }
    }

    /// Makes the factory external-transaction aware, joining `external`.
    #[must_use]
    pub fn with_external(mut self, external: Arc<LocalTransaction>) -> Self {
        self.external = Some(external);
        self
    }

    /// Transactions begun so far, in order.
    #[must_use]
    pub fn begun(&self) -> Vec<Arc<LocalTransaction>> {
        self.begun.lock().clone()
    }
}

#[async_trait]
impl TransactionFactory for LocalTransactionFactory {
    async fn begin_transaction(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Arc<dyn Transaction>, TransactionError> {
        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(tx = %id, xa = self.xa, ?timeout, "beginning local transaction");
        let tx = Arc::new(LocalTransaction::new(id, self.xa));
        self.begun.lock().push(Arc::clone(&tx));
        Ok(tx)
    }

    fn as_external_aware(&self) -> Option<&dyn ExternalTransactionAwareFactory> {
        if self.external.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl ExternalTransactionAwareFactory for LocalTransactionFactory {
    async fn join_external_transaction(
        &self,
    ) -> Result<Option<Arc<dyn Transaction>>, TransactionError> {
        Ok(self
            .external
            .as_ref()
            .filter(|tx| tx.status() == TransactionStatus::Active)
            .map(|tx| Arc::clone(tx) as Arc<dyn Transaction>))
    }
}

// ---------------------------------------------------------------------------
// TransactionScope
// ---------------------------------------------------------------------------

/// The transaction bound to one logical message, shared by all executions
/// working on it.
///
/// The lock is never held across an `.await`: every async operation first
/// takes the transaction out of the scope.
#[derive(Clone, Default)]
pub struct TransactionScope {
    current: Arc<Mutex<Option<Arc<dyn Transaction>>>>,
}

impl TransactionScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently bound transaction.
    #[must_use]
    pub fn transaction(&self) -> Option<Arc<dyn Transaction>> {
        self.current.lock().clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Binds `tx` to the scope.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::AlreadyBound`] if another transaction is bound.
    pub fn bind(&self, tx: Arc<dyn Transaction>) -> Result<(), TransactionError> {
        let mut current = self.current.lock();
        if let Some(bound) = current.as_ref() {
            return Err(TransactionError::AlreadyBound(bound.id().to_string()));
        }
        trace!(tx = %tx.id(), "binding transaction");
        *current = Some(tx);
        Ok(())
    }

    /// Unbinds and returns the current transaction.
    pub fn unbind(&self) -> Option<Arc<dyn Transaction>> {
        self.current.lock().take()
    }

    /// Unbinds the current transaction only if it is the one with `id`.
    pub fn unbind_if(&self, id: &str) -> Option<Arc<dyn Transaction>> {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|tx| tx.id() == id) {
            current.take()
        } else {
            None
        }
    }

    /// Unbinds the current transaction and finishes it: rolled back if it was
    /// marked rollback-only, committed otherwise. No-op when nothing is bound.
    ///
    /// # Errors
    ///
    /// Returns the commit or rollback failure.
    pub async fn resolve(&self) -> Result<(), TransactionError> {
        let Some(tx) = self.unbind() else {
            return Ok(());
        };
        if tx.is_rollback_only() {
            debug!(tx = %tx.id(), "resolving transaction: rollback");
            tx.rollback().await
        } else {
            debug!(tx = %tx.id(), "resolving transaction: commit");
            tx.commit().await
        }
    }

    /// Detaches the current transaction so nested work does not see it.
    /// Pass the returned value to [`restore`](Self::restore) afterwards.
    pub fn isolate(&self) -> Option<Arc<dyn Transaction>> {
        let isolated = self.unbind();
        if let Some(tx) = &isolated {
            debug!(tx = %tx.id(), "isolating transaction");
        }
        isolated
    }

    /// Rebinds a transaction detached by [`isolate`](Self::isolate),
    /// discarding whatever nested work left bound.
    pub fn restore(&self, isolated: Option<Arc<dyn Transaction>>) {
        let Some(tx) = isolated else {
            return;
        };
        debug!(tx = %tx.id(), "restoring isolated transaction");
        let replaced = self.current.lock().replace(tx);
        if let Some(leftover) = replaced {
            debug!(tx = %leftover.id(), "dropping transaction left by isolated work");
        }
    }

    /// Suspends and unbinds the current transaction if it is XA.
    ///
    /// # Errors
    ///
    /// Returns the suspend failure; the transaction stays bound in that case.
    pub async fn suspend_xa(&self) -> Result<Option<Arc<dyn Transaction>>, TransactionError> {
        let tx = {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|tx| tx.is_xa()) {
                current.take()
            } else {
                None
            }
        };
        let Some(tx) = tx else {
            return Ok(None);
        };
        debug!(tx = %tx.id(), "suspending xa transaction");
        if let Err(err) = tx.suspend().await {
            *self.current.lock() = Some(tx);
            return Err(err);
        }
        Ok(Some(tx))
    }

    /// Resumes a transaction suspended by [`suspend_xa`](Self::suspend_xa)
    /// and binds it again.
    ///
    /// # Errors
    ///
    /// Returns the resume failure, or [`TransactionError::AlreadyBound`] if
    /// nested work left another transaction bound.
    pub async fn resume_xa(&self, tx: Arc<dyn Transaction>) -> Result<(), TransactionError> {
        debug!(tx = %tx.id(), "resuming xa transaction");
        tx.resume().await?;
        self.bind(tx)
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.lock();
        f.debug_struct("TransactionScope")
            .field("current", &current.as_ref().map(|tx| tx.id().to_string()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
