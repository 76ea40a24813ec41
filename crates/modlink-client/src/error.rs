use std::time::Duration;

use modlink_wire::WireError;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket-level connect failure. Fatal to this attempt, retryable.
    #[error("failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// `connect` was called while a connection is already up.
    #[error("already connected")]
    AlreadyConnected,

    /// The operation requires a live connection.
    #[error("not connected")]
    NotConnected,

    /// The request saw no response within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection dropped while the request was in flight.
    #[error("connection lost")]
    ConnectionLost,

    /// The wait was cancelled from another thread.
    #[error("request cancelled")]
    Cancelled,

    /// All 31 sequence-number slots are occupied.
    ///
    /// Backpressure signal: reduce the number of concurrent synchronous calls.
    #[error("pending-request table full")]
    TableFull,

    /// The device reported an error in its response.
    #[error("device error: {0}")]
    Device(DeviceError),

    /// Wire-level error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Device-level error codes surfaced from the wire response.
///
/// These are not recovered locally; they are returned to the caller typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("invalid parameter")]
    InvalidParameter,

    #[error("function not supported")]
    NotSupported,

    #[error("unknown error code {0}")]
    Unknown(u8),
}

impl DeviceError {
    /// Map a wire error code to a typed device error. Zero means success.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            modlink_wire::ERROR_CODE_OK => None,
            modlink_wire::ERROR_CODE_INVALID_PARAMETER => Some(Self::InvalidParameter),
            modlink_wire::ERROR_CODE_NOT_SUPPORTED => Some(Self::NotSupported),
            other => Some(Self::Unknown(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_from_code() {
        assert_eq!(DeviceError::from_code(0), None);
        assert_eq!(DeviceError::from_code(1), Some(DeviceError::InvalidParameter));
        assert_eq!(DeviceError::from_code(2), Some(DeviceError::NotSupported));
        assert_eq!(DeviceError::from_code(3), Some(DeviceError::Unknown(3)));
    }
}
