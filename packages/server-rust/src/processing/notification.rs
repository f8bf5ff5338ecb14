//! Fan-out of connector notifications to registered listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conveyor_core::{ConnectorAction, ConnectorMessageNotification, Event, NotificationListener};
use parking_lot::RwLock;
use tracing::trace;

use super::context::MessageProcessContext;

/// Composite listener. Listeners are called in registration order on the
/// task that fires the notification.
pub struct NotificationManager {
    listeners: RwLock<Vec<Arc<dyn NotificationListener>>>,
    enabled: AtomicBool,
}

impl NotificationManager {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.listeners.write().push(listener);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Fires `action` for the message described by `context`.
    pub fn fire(&self, action: ConnectorAction, context: &MessageProcessContext, event: Option<&Event>) {
        if !self.is_enabled() {
            return;
        }
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        let notification = ConnectorMessageNotification::new(
            action,
            context.source_id(),
            context.flow_name(),
            event.cloned(),
        );
        trace!(action = action.as_str(), source = context.source_id(), "firing notification");
        for listener in &listeners {
            listener.on_notification(&notification);
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new(true)
    }
}
