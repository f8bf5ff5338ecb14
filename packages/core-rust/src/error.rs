//! Event-scoped failures.

use std::error::Error as StdError;

use crate::event::{Event, EventError};

/// Boxed cause carried by a [`MessagingException`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Distinguishes routing failures from failures to write a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessagingErrorKind {
    /// Raised while routing the event through a flow.
    Routing,
    /// Raised while transmitting a response. The flow-processing phase never
    /// attempts another response after one of these.
    ResponseDispatch,
}

/// A recoverable failure bound to the event being processed when it occurred.
///
/// Exception strategies set [`handled`](Self::handled) once they produce a
/// recovery event, which is then carried by [`event`](Self::event).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct MessagingException {
    kind: MessagingErrorKind,
    message: String,
    event: Event,
    handled: bool,
    failing_processor: Option<String>,
    #[source]
    cause: Option<BoxError>,
}

impl MessagingException {
    #[must_use]
    pub fn new(message: impl Into<String>, event: Event) -> Self {
        Self {
            kind: MessagingErrorKind::Routing,
            message: message.into(),
            event,
            handled: false,
            failing_processor: None,
            cause: None,
        }
    }

    /// Wraps a failure to transmit a response for `event`.
    #[must_use]
    pub fn response_dispatch(event: Event, cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self {
            kind: MessagingErrorKind::ResponseDispatch,
            message: format!("failed to dispatch response: {cause}"),
            event,
            handled: false,
            failing_processor: None,
            cause: Some(cause),
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    #[must_use]
    pub fn with_failing_processor(mut self, processor: impl Into<String>) -> Self {
        self.failing_processor = Some(processor.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> MessagingErrorKind {
        self.kind
    }

    #[must_use]
    pub fn is_response_dispatch(&self) -> bool {
        self.kind == MessagingErrorKind::ResponseDispatch
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The failed event, or the recovery event once a strategy has run.
    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    #[must_use]
    pub fn handled(&self) -> bool {
        self.handled
    }

    #[must_use]
    pub fn failing_processor(&self) -> Option<&str> {
        self.failing_processor.as_deref()
    }

    /// Marks the exception as handled (or not) by an exception strategy.
    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    /// Replaces the carried event with the one an exception strategy produced.
    pub fn set_processed_event(&mut self, event: Event) {
        self.event = event;
    }

    /// The carried event annotated with this failure, as seen by exception
    /// strategy processors.
    #[must_use]
    pub fn event_with_error(&self) -> Event {
        self.event.with_error(EventError {
            description: self.message.clone(),
            failing_processor: self.failing_processor.clone(),
        })
    }

    #[must_use]
    pub fn into_event(self) -> Event {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn handled_flag_and_processed_event() {
        let failed = Event::new("in");
        let mut err = MessagingException::new("boom", failed.clone()).with_failing_processor("p1");
        assert!(!err.handled());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.failing_processor(), Some("p1"));

        let recovered = failed.with_payload("recovered");
        err.set_handled(true);
        err.set_processed_event(recovered.clone());

        assert!(err.handled());
        assert_eq!(err.into_event(), recovered);
    }

    #[test]
    fn response_dispatch_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone");
        let err = MessagingException::response_dispatch(Event::new("out"), io);

        assert!(err.is_response_dispatch());
        assert_eq!(err.kind(), MessagingErrorKind::ResponseDispatch);
        assert!(err.to_string().contains("peer gone"));
        assert!(err.source().is_some());
    }

    #[test]
    fn event_with_error_annotates_copy() {
        let err = MessagingException::new("bad input", Event::new("in")).with_failing_processor("parse");
        let annotated = err.event_with_error();

        assert_eq!(annotated.error().map(|e| e.description.as_str()), Some("bad input"));
        assert!(err.event().error().is_none());
    }
}
