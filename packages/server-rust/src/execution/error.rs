//! Error types raised by the execution interceptor chain.

use conveyor_core::{Event, MessagingException};

use super::transaction::{TransactionAction, TransactionStatus};

/// Failure of a transaction operation or an invalid transactional state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransactionError {
    /// The requested action is incompatible with the transaction currently bound.
    #[error("illegal transactional state: {0}")]
    IllegalState(String),
    /// A transaction is already bound to the scope.
    #[error("transaction {0} is already bound to this scope")]
    AlreadyBound(String),
    /// The action needs to begin a transaction but no factory is configured.
    #[error("no transaction factory configured for action {0:?}")]
    MissingFactory(TransactionAction),
    /// The operation is not valid for the transaction's current status.
    #[error("transaction {id} is {status:?}")]
    NotActive { id: String, status: TransactionStatus },
    /// The underlying resource failed.
    #[error("transaction resource failure: {0}")]
    Resource(String),
}

/// Error returned by execution templates and the services they are built from.
///
/// Only [`ExecutionError::Messaging`] takes part in the handled/unhandled
/// exception protocol. Every other variant is fatal and passes through the
/// interceptors untouched.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Messaging(#[from] MessagingException),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl ExecutionError {
    /// Shorthand for a routing [`MessagingException`] on `event`.
    #[must_use]
    pub fn messaging(message: impl Into<String>, event: Event) -> Self {
        Self::Messaging(MessagingException::new(message, event))
    }

    #[must_use]
    pub fn as_messaging(&self) -> Option<&MessagingException> {
        match self {
            Self::Messaging(exception) => Some(exception),
            _ => None,
        }
    }

    /// Returns `true` for a messaging exception an exception strategy has handled.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.as_messaging().is_some_and(MessagingException::handled)
    }

    /// Returns `true` for a failure to transmit a response.
    #[must_use]
    pub fn is_response_dispatch(&self) -> bool {
        self.as_messaging()
            .is_some_and(MessagingException::is_response_dispatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let mut exception = MessagingException::new("boom", Event::new("x"));
        exception.set_handled(true);
        let handled = ExecutionError::from(exception);
        assert!(handled.is_handled());
        assert!(!handled.is_response_dispatch());

        let fatal = ExecutionError::from(anyhow::anyhow!("disk on fire"));
        assert!(fatal.as_messaging().is_none());
        assert_eq!(fatal.to_string(), "disk on fire");

        let dispatch = ExecutionError::from(MessagingException::response_dispatch(
            Event::new("x"),
            "socket closed",
        ));
        assert!(dispatch.is_response_dispatch());
    }
}
