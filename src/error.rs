//! Error type shared by the presenter, the [crate::Peripheral] seam and the mock.

/// The error type for Bluetooth operations and coordinator failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error of the given kind with a human-readable message.
    pub fn new<S: ToString>(kind: ErrorKind, message: S) -> Self {
        Error {
            kind,
            message: message.to_string(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            message: String::new(),
        }
    }
}

impl From<AttError> for Error {
    fn from(att_error: AttError) -> Self {
        Error::new(ErrorKind::Protocol(att_error), att_error)
    }
}

/// What went wrong, independent of the message.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// The device could not be connected.
    ConnectionFailed,
    /// The connection is gone.
    NotConnected,
    /// The characteristic lacks the property needed for the operation.
    NotSupported,
    /// The service or characteristic is absent from the device.
    NotFound,
    /// Malformed input, such as a write payload that is not hex.
    InvalidParameter,
    Timeout,
    /// The device answered with an ATT error.
    Protocol(AttError),
    /// Notifications and indications are mutually exclusive on one characteristic.
    AlreadyNotifying,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::NotConnected => "the device isn't connected",
            ErrorKind::NotSupported => "the operation is unsupported",
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Protocol(_) => "protocol error",
            ErrorKind::AlreadyNotifying => "a conflicting notification is already set up",
            ErrorKind::Other => "error",
        };
        f.write_str(text)
    }
}

/// Bluetooth Attribute Protocol error. See the Bluetooth Core Specification, Vol 3, Part F, §3.4.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttError(u8);

impl AttError {
    /// The attribute handle given was not valid on this server.
    pub const INVALID_HANDLE: AttError = AttError(0x01);
    /// The attribute cannot be read.
    pub const READ_NOT_PERMITTED: AttError = AttError(0x02);
    /// The attribute cannot be written.
    pub const WRITE_NOT_PERMITTED: AttError = AttError(0x03);
    /// The attribute requires authentication before it can be read or written.
    pub const INSUFFICIENT_AUTHENTICATION: AttError = AttError(0x05);
    /// Attribute server does not support the request received from the client.
    pub const REQUEST_NOT_SUPPORTED: AttError = AttError(0x06);
    /// The attribute value length is invalid for the operation.
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: AttError = AttError(0x0d);
    /// The request could not be completed for an unlikely reason.
    pub const UNLIKELY_ERROR: AttError = AttError(0x0e);
    /// Client Characteristic Configuration Descriptor Improperly Configured
    pub const CCCD_IMPROPERLY_CONFIGURED: AttError = AttError(0xfd);
    /// Procedure Already in Progress
    pub const PROCEDURE_ALREADY_IN_PROGRESS: AttError = AttError(0xfe);

    /// Converts a [`u8`] value to an [`AttError`].
    pub const fn from_u8(val: u8) -> Self {
        AttError(val)
    }

    /// Converts an [`AttError`] to a [`u8`] value.
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Checks if the error code is in the application error range.
    pub fn is_application(&self) -> bool {
        (0x80..0xa0).contains(&self.0)
    }
}

impl std::fmt::Display for AttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match *self {
            AttError::INVALID_HANDLE => "invalid attribute handle",
            AttError::READ_NOT_PERMITTED => "read not permitted",
            AttError::WRITE_NOT_PERMITTED => "write not permitted",
            AttError::INSUFFICIENT_AUTHENTICATION => "insufficient authentication",
            AttError::REQUEST_NOT_SUPPORTED => "request not supported",
            AttError::INVALID_ATTRIBUTE_VALUE_LENGTH => "invalid attribute value length",
            AttError::UNLIKELY_ERROR => "unlikely error",
            AttError::CCCD_IMPROPERLY_CONFIGURED => "CCCD improperly configured",
            AttError::PROCEDURE_ALREADY_IN_PROGRESS => "procedure already in progress",
            _ if self.is_application() => {
                return write!(f, "application error 0x{:02x}", self.0);
            }
            _ => return write!(f, "unknown ATT error 0x{:02x}", self.0),
        };
        f.write_str(text)
    }
}

impl From<u8> for AttError {
    fn from(number: u8) -> Self {
        AttError(number)
    }
}

impl From<AttError> for u8 {
    fn from(val: AttError) -> Self {
        val.0
    }
}
