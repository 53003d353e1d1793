use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::oplog::OperationEventLogger;
use super::NotificationType;

/// Text of the [crate::PresenterEvent::Info] event emitted once a connect cycle is ready.
pub const DEFAULT_CONNECTED_TEXT: &str = "Hey, connection has been established!";

/// Configuration for [crate::Presenter].
#[derive(Clone)]
pub struct PresenterConfig {
    pub(crate) auto_connect: bool,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) tie_break: NotificationType,
    pub(crate) connected_text: String,
    pub(crate) operation_logger: Option<Arc<dyn OperationEventLogger>>,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            auto_connect: false,
            connect_timeout: None,
            tie_break: NotificationType::Notification,
            connected_text: DEFAULT_CONNECTED_TEXT.to_string(),
            operation_logger: None,
        }
    }
}

impl fmt::Debug for PresenterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenterConfig")
            .field("auto_connect", &self.auto_connect)
            .field("connect_timeout", &self.connect_timeout)
            .field("tie_break", &self.tie_break)
            .field("connected_text", &self.connected_text)
            .field("operation_logger", &self.operation_logger.is_some())
            .finish()
    }
}

impl PresenterConfig {
    /// Passed to [crate::Peripheral::connect]; the stack reconnects by itself when the
    /// device comes back in range.
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Fails a connect attempt (including characteristic discovery) with
    /// [crate::ErrorKind::Timeout] when it takes longer than `timeout`.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Which kind wins when enable-notify and enable-indicate intents are both
    /// pending at the moment of selection. Defaults to notifications.
    pub fn tie_break(mut self, kind: NotificationType) -> Self {
        self.tie_break = kind;
        self
    }

    pub fn connected_text(mut self, text: impl Into<String>) -> Self {
        self.connected_text = text.into();
        self
    }

    /// Reports every characteristic operation to `logger`.
    pub fn operation_logger(mut self, logger: Arc<dyn OperationEventLogger>) -> Self {
        self.operation_logger = Some(logger);
        self
    }
}
