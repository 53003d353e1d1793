use std::fmt;

use super::{Error, OperationKind};

/// Events produced by [crate::Presenter] for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenterEvent {
    /// A human-readable status message.
    Info(String),
    /// Whether notify/indicate setup falls back to compat mode for this characteristic.
    CompatibilityMode(bool),
    /// Payload of a successful read, write, notification or indication.
    Result(Vec<u8>, OperationKind),
    /// Failure of a single operation.
    Error(Error, OperationKind),
}

impl PresenterEvent {
    pub(crate) fn from_outcome(outcome: crate::Result<Vec<u8>>, kind: OperationKind) -> Self {
        match outcome {
            Ok(bytes) => PresenterEvent::Result(bytes, kind),
            Err(e) => PresenterEvent::Error(e, kind),
        }
    }

    /// The operation this event reports on, if any.
    pub fn operation_kind(&self) -> Option<OperationKind> {
        match self {
            PresenterEvent::Result(_, kind) | PresenterEvent::Error(_, kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for PresenterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenterEvent::Info(text) => f.write_str(text),
            PresenterEvent::CompatibilityMode(true) => {
                f.write_str("notifications are set up in compatibility mode")
            }
            PresenterEvent::CompatibilityMode(false) => f.write_str("notifications use the CCCD"),
            PresenterEvent::Result(bytes, kind) => write!(f, "{kind}: {}", hex::encode_upper(bytes)),
            PresenterEvent::Error(err, kind) => write!(f, "{kind} failed: {err}"),
        }
    }
}
