//! Conveyor Core: events, correlation, messaging exceptions, and connector
//! notifications.

pub mod context;
pub mod error;
pub mod event;
pub mod notification;
pub mod traits;
pub mod types;

pub use context::Correlation;
pub use error::{BoxError, MessagingErrorKind, MessagingException};
pub use event::{Event, EventError};
pub use notification::{ConnectorAction, ConnectorMessageNotification};
pub use traits::NotificationListener;
pub use types::Value;
