//! Engine status codes and RPC error types.
//!
//! Every reply from the engine carries a signed return value. Zero is
//! success; negative values identify the failure.

use std::fmt;
use thiserror::Error;

/// Return codes reported by the forwarding engine.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStatus {
    Success = 0,
    Unspecified = -1,
    Unimplemented = -2,
    InvalidIndex = -3,
    NoSuchEntry = -6,
    EntryAlreadyExists = -7,
    InvalidValue = -10,
    TableFull = -12,
    InstanceInUse = -13,
    NotConnected = -14,
}

impl EngineStatus {
    /// Creates an EngineStatus from a raw return value.
    pub fn from_raw(retval: i32) -> Self {
        match retval {
            0 => EngineStatus::Success,
            -2 => EngineStatus::Unimplemented,
            -3 => EngineStatus::InvalidIndex,
            -6 => EngineStatus::NoSuchEntry,
            -7 => EngineStatus::EntryAlreadyExists,
            -10 => EngineStatus::InvalidValue,
            -12 => EngineStatus::TableFull,
            -13 => EngineStatus::InstanceInUse,
            -14 => EngineStatus::NotConnected,
            _ => EngineStatus::Unspecified,
        }
    }

    /// Returns the raw return value.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == EngineStatus::Success
    }

    /// Returns true if the referenced entry does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineStatus::NoSuchEntry | EngineStatus::InvalidIndex)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineStatus::Success => "SUCCESS",
            EngineStatus::Unspecified => "UNSPECIFIED",
            EngineStatus::Unimplemented => "UNIMPLEMENTED",
            EngineStatus::InvalidIndex => "INVALID_INDEX",
            EngineStatus::NoSuchEntry => "NO_SUCH_ENTRY",
            EngineStatus::EntryAlreadyExists => "ENTRY_ALREADY_EXISTS",
            EngineStatus::InvalidValue => "INVALID_VALUE",
            EngineStatus::TableFull => "TABLE_FULL",
            EngineStatus::InstanceInUse => "INSTANCE_IN_USE",
            EngineStatus::NotConnected => "NOT_CONNECTED",
        };
        write!(f, "{} ({})", s, self.as_raw())
    }
}

/// Error type for engine calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// The engine answered with a non-zero return value.
    #[error("{message} failed: {status}")]
    Status { message: String, status: EngineStatus },

    /// No reply arrived within the configured timeout.
    #[error("{message} timed out after {timeout_ms} ms")]
    Timeout { message: String, timeout_ms: u64 },

    /// The engine answered without a payload where one was expected.
    #[error("{message} returned an empty reply")]
    EmptyReply { message: String },

    /// A request or reply could not be (de)serialized.
    #[error("{message}: codec error: {reason}")]
    Codec { message: String, reason: String },

    /// The channel is not connected.
    #[error("not connected to the forwarding engine")]
    Disconnected,
}

impl RpcError {
    /// Creates an error for a failed return value.
    pub fn status(message: impl Into<String>, status: EngineStatus) -> Self {
        RpcError::Status {
            message: message.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        RpcError::Timeout {
            message: message.into(),
            timeout_ms,
        }
    }

    /// Creates an empty-reply error.
    pub fn empty_reply(message: impl Into<String>) -> Self {
        RpcError::EmptyReply {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>, reason: impl ToString) -> Self {
        RpcError::Codec {
            message: message.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the engine status if this is a Status error.
    pub fn engine_status(&self) -> Option<EngineStatus> {
        match self {
            RpcError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the engine reported that the referenced entry does
    /// not exist.
    pub fn is_not_found(&self) -> bool {
        self.engine_status().is_some_and(|status| status.is_not_found())
    }

    /// Returns true if the engine answered with a null reply.
    pub fn is_empty_reply(&self) -> bool {
        matches!(self, RpcError::EmptyReply { .. })
    }

    /// Returns true if the call timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

/// Result type for engine calls.
pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(EngineStatus::from_raw(0), EngineStatus::Success);
        assert_eq!(EngineStatus::from_raw(-6), EngineStatus::NoSuchEntry);
        assert_eq!(EngineStatus::from_raw(-999), EngineStatus::Unspecified);
        assert_eq!(EngineStatus::TableFull.as_raw(), -12);
    }

    #[test]
    fn test_status_classification() {
        assert!(EngineStatus::Success.is_success());
        assert!(!EngineStatus::Unspecified.is_success());
        assert!(EngineStatus::NoSuchEntry.is_not_found());
        assert!(!EngineStatus::TableFull.is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = RpcError::status("interface_add", EngineStatus::TableFull);
        assert_eq!(err.to_string(), "interface_add failed: TABLE_FULL (-12)");

        let err = RpcError::timeout("interface_dump", 5000);
        assert_eq!(err.to_string(), "interface_dump timed out after 5000 ms");
    }

    #[test]
    fn test_error_classification() {
        assert!(RpcError::empty_reply("x_dump").is_empty_reply());
        assert!(RpcError::timeout("x_dump", 1).is_timeout());
        assert_eq!(
            RpcError::status("x_add", EngineStatus::InvalidValue).engine_status(),
            Some(EngineStatus::InvalidValue)
        );
        assert_eq!(RpcError::Disconnected.engine_status(), None);
    }
}
