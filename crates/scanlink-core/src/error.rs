//! Error types for the scanlink-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate.
//! Variants fall into five families: status codes reported by the daemon,
//! transport failures, protocol invariant violations, local usage errors
//! (rejected before anything is sent) and scan outcomes.

use crate::wire::{FrameFormat, Status, ValueType};
use thiserror::Error;

/// Result type alias for scanlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all scanlink operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The daemon answered with a non-success status word
    #[error("saned returned status: {status}")]
    Status {
        /// Decoded status
        status: Status,
    },

    /// Underlying socket I/O failed
    #[error("I/O error on SANE connection: {0}")]
    Io(#[from] std::io::Error),

    /// Could not reach the daemon or the data port
    #[error("failed to connect to '{address}': {source}")]
    Connect {
        /// Address that was dialed
        address: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the stream in the middle of a reply, or the
    /// connection has already been shut down with an exit command
    #[error("connection to saned is closed")]
    ConnectionClosed,

    /// A resource challenge was raised again after authorizing once
    #[error("authorization for resource '{resource}' was rejected")]
    AuthenticationFailed {
        /// Resource named by the second challenge
        resource: String,
    },

    /// The daemon broke a protocol invariant (e.g. echoed type or size)
    #[error("protocol violation: {details}")]
    ProtocolViolation {
        /// Detailed description of the issue
        details: String,
    },

    /// Option descriptor carries a constraint tag we cannot decode
    #[error("unsupported constraint type {0}")]
    UnsupportedConstraint(i32),

    /// Option descriptor carries a value type tag we cannot handle
    #[error("unsupported option value type {0}")]
    UnsupportedValueType(i32),

    /// Option is inactive and can be neither read nor written
    #[error("option '{name}' is inactive")]
    OptionInactive {
        /// Option name
        name: String,
    },

    /// Option is not software-settable
    #[error("option '{name}' is read-only")]
    OptionReadOnly {
        /// Option name
        name: String,
    },

    /// Option cannot be put into automatic mode
    #[error("option '{name}' cannot be set to automatic")]
    AutomaticNotAllowed {
        /// Option name
        name: String,
    },

    /// Group options only structure the option list and carry no value
    #[error("option '{name}' is a group and has no value")]
    GroupOption {
        /// Option name
        name: String,
    },

    /// Value rejected by the option's constraint
    #[error("value '{value}' is not permitted by the constraint of option '{name}'")]
    ConstraintViolation {
        /// Option name
        name: String,
        /// Rejected value, formatted
        value: String,
    },

    /// Value variant does not match the option's type tag
    #[error("option '{name}' holds {expected:?} values, got {actual:?}")]
    TypeMismatch {
        /// Option name
        name: String,
        /// Type tag declared by the option
        expected: ValueType,
        /// Type of the supplied value
        actual: ValueType,
    },

    /// Text could not be converted into an option value
    #[error("cannot parse '{text}' as a {value_type:?} value")]
    InvalidValue {
        /// Target type
        value_type: ValueType,
        /// Offending input
        text: String,
    },

    /// Address string is not `host:port`
    #[error("invalid address '{0}': expected host:port")]
    InvalidAddress(String),

    /// The device session has been closed (or dropped)
    #[error("device '{name}' is closed")]
    DeviceClosed {
        /// Device name
        name: String,
    },

    /// The acquisition was cancelled
    #[error("scan cancelled")]
    Cancelled,

    /// Separate colour planes cannot be interleaved yet
    #[error("frame format {0:?} is not supported")]
    UnsupportedFrameFormat(FrameFormat),

    /// Pixel depth outside 1, 8 and 16 bits
    #[error("unsupported pixel depth {0}")]
    UnsupportedDepth(i32),

    /// Not enough image data for the reported geometry
    #[error("image data too short: need {expected} bytes, got {actual}")]
    ImageSize {
        /// Bytes required by width, lines and depth
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new status error from a raw status word
    pub fn status(code: i32) -> Self {
        Self::Status {
            status: Status::from_word(code),
        }
    }

    /// Creates a new connect error
    pub fn connect(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connect {
            address: address.into(),
            source,
        }
    }

    /// Creates a new authentication failure
    pub fn authentication_failed(resource: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            resource: resource.into(),
        }
    }

    /// Creates a new protocol violation error
    pub fn protocol_violation(details: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            details: details.into(),
        }
    }

    /// Creates a new constraint violation error
    pub fn constraint_violation(name: impl Into<String>, value: impl ToString) -> Self {
        Self::ConstraintViolation {
            name: name.into(),
            value: value.to_string(),
        }
    }

    /// Creates a new device-closed error
    pub fn device_closed(name: impl Into<String>) -> Self {
        Self::DeviceClosed { name: name.into() }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the daemon status carried by this error, if any
    pub fn sane_status(&self) -> Option<Status> {
        match self {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for errors raised locally before any byte was sent
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::OptionInactive { .. }
                | Self::OptionReadOnly { .. }
                | Self::AutomaticNotAllowed { .. }
                | Self::GroupOption { .. }
                | Self::ConstraintViolation { .. }
                | Self::TypeMismatch { .. }
                | Self::InvalidValue { .. }
                | Self::InvalidAddress(_)
                | Self::DeviceClosed { .. }
        )
    }

    /// Returns true if the connection can no longer be trusted after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Connect { .. }
                | Self::ConnectionClosed
                | Self::ProtocolViolation { .. }
                | Self::UnsupportedConstraint(_)
                | Self::UnsupportedValueType(_)
        )
    }

    /// Maps an unexpected EOF to [`Error::ConnectionClosed`]
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::status(6);
        assert!(err.to_string().contains("code 6"));
        assert!(err.to_string().contains("jammed"));

        let err = Error::constraint_violation("resolution", 307);
        assert!(err.to_string().contains("'307'"));
        assert!(err.to_string().contains("resolution"));
    }

    #[test]
    fn test_classification() {
        assert!(Error::constraint_violation("mode", "Lineart").is_usage());
        assert!(!Error::constraint_violation("mode", "Lineart").is_fatal());
        assert!(Error::protocol_violation("size").is_fatal());
        assert!(Error::ConnectionClosed.is_fatal());
        assert!(!Error::Cancelled.is_usage());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(Error::status(11).sane_status(), Some(Status::AccessDenied));
        assert_eq!(Error::status(42).sane_status(), Some(Status::Unknown(42)));
        assert_eq!(Error::Cancelled.sane_status(), None);
    }

    #[test]
    fn test_unexpected_eof_is_connection_closed() {
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(matches!(Error::from_read(eof), Error::ConnectionClosed));

        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(matches!(Error::from_read(reset), Error::Io(_)));
    }
}
