use uuid::Uuid;

/// Correlation metadata carried by every event.
/// Preserved across copy-on-write updates so that responses, retries and
/// split parts can be tied back to the inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Identifier shared by every event derived from the same inbound message.
    pub correlation_id: String,
    /// Position of this event within a group, if the message was split.
    pub sequence: Option<u32>,
    /// Number of events in the group, if the message was split.
    pub group_size: Option<u32>,
    /// Identifier of the message source that produced the inbound message.
    pub source_id: Option<String>,
}

impl Correlation {
    /// Creates correlation metadata with a fresh random correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Creates correlation metadata with the given correlation id.
    #[must_use]
    pub fn with_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            sequence: None,
            group_size: None,
            source_id: None,
        }
    }

    /// Sets the source identifier.
    #[must_use]
    pub fn from_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

impl Default for Correlation {
    fn default() -> Self {
        Self::generate()
    }
}
