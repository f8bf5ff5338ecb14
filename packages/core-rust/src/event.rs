//! The message in flight.
//!
//! [`Event`] is an immutable, cheaply clonable handle. Every `with_*` method
//! returns a new event and leaves the receiver untouched, so an event can be
//! shared between the pipeline, exception strategies, and notification
//! listeners without synchronization.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::context::Correlation;
use crate::types::Value;

/// Summary of a failure attached to an event while an exception strategy
/// runs, or kept on the event a strategy returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventError {
    /// Human-readable failure description.
    pub description: String,
    /// Name of the processor that raised the failure, if known.
    pub failing_processor: Option<String>,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failing_processor {
            Some(processor) => write!(f, "{} (at {processor})", self.description),
            None => f.write_str(&self.description),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EventData {
    id: Uuid,
    correlation: Correlation,
    payload: Value,
    variables: BTreeMap<String, Value>,
    error: Option<EventError>,
}

/// A message in flight through one routing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    inner: Arc<EventData>,
}

impl Event {
    /// Creates an event with a fresh id and correlation.
    #[must_use]
    pub fn new(payload: impl Into<Value>) -> Self {
        Self::with_correlation(payload, Correlation::generate())
    }

    /// Creates an event with a fresh id and the given correlation.
    #[must_use]
    pub fn with_correlation(payload: impl Into<Value>, correlation: Correlation) -> Self {
        Self {
            inner: Arc::new(EventData {
                id: Uuid::new_v4(),
                correlation,
                payload: payload.into(),
                variables: BTreeMap::new(),
                error: None,
            }),
        }
    }

    /// Unique identifier of this event, stable across copy-on-write updates.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    #[must_use]
    pub fn correlation(&self) -> &Correlation {
        &self.inner.correlation
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.inner.payload
    }

    /// Looks up a flow variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.inner.variables.get(name)
    }

    #[must_use]
    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.inner.variables
    }

    /// The in-flight error, if an exception strategy is running or left one.
    #[must_use]
    pub fn error(&self) -> Option<&EventError> {
        self.inner.error.as_ref()
    }

    /// Returns a copy with the payload replaced.
    #[must_use]
    pub fn with_payload(&self, payload: impl Into<Value>) -> Self {
        let payload = payload.into();
        self.derive(|data| data.payload = payload)
    }

    /// Returns a copy with the variable set.
    #[must_use]
    pub fn with_variable(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let (name, value) = (name.into(), value.into());
        self.derive(|data| {
            data.variables.insert(name, value);
        })
    }

    /// Returns a copy without the variable.
    #[must_use]
    pub fn without_variable(&self, name: &str) -> Self {
        self.derive(|data| {
            data.variables.remove(name);
        })
    }

    /// Returns a copy carrying the given error.
    #[must_use]
    pub fn with_error(&self, error: EventError) -> Self {
        self.derive(|data| data.error = Some(error))
    }

    /// Returns a copy with any error cleared.
    #[must_use]
    pub fn without_error(&self) -> Self {
        self.derive(|data| data.error = None)
    }

    /// Returns `true` if both handles point at the same underlying data.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn derive(&self, update: impl FnOnce(&mut EventData)) -> Self {
        let mut data = (*self.inner).clone();
        update(&mut data);
        Self {
            inner: Arc::new(data),
        }
    }
}
