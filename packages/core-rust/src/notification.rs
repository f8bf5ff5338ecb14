use crate::event::Event;

/// Lifecycle point at which a connector notification fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorAction {
    /// Fired before the inbound event is routed.
    MessageReceived,
    /// Fired after a response has been handed to the source.
    MessageResponse,
    /// Fired after a failure response has been handed to the source.
    MessageErrorResponse,
}

impl ConnectorAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageReceived => "message-received",
            Self::MessageResponse => "message-response",
            Self::MessageErrorResponse => "message-error-response",
        }
    }
}

/// Notification describing one connector-level event in a message's life.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorMessageNotification {
    pub action: ConnectorAction,
    /// Identifier of the message source.
    pub source_id: String,
    /// Name of the flow the source feeds, if any.
    pub flow_name: Option<String>,
    /// Event the notification refers to. `None` when routing filtered the message.
    pub event: Option<Event>,
}

impl ConnectorMessageNotification {
    #[must_use]
    pub fn new(
        action: ConnectorAction,
        source_id: impl Into<String>,
        flow_name: Option<String>,
        event: Option<Event>,
    ) -> Self {
        Self {
            action,
            source_id: source_id.into(),
            flow_name,
            event,
        }
    }
}
