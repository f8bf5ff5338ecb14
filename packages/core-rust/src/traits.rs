use crate::notification::ConnectorMessageNotification;

/// Receives connector notifications fired while messages are processed.
///
/// Called synchronously from the processing task; implementations must not
/// block.
pub trait NotificationListener: Send + Sync {
    fn on_notification(&self, notification: &ConnectorMessageNotification);
}
