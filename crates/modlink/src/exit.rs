use std::fmt;
use std::io;

use modlink_client::ClientError;
use modlink_wire::WireError;

// Exit code constants, sysexits-adjacent.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const CONNECTION_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => CONNECTION_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::Io(source) => io_error(context, source),
        WireError::PayloadTooLarge { .. } | WireError::SequenceOutOfRange(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        WireError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::ConnectFailed { .. } => {
            CliError::new(CONNECTION_ERROR, format!("{context}: {err}"))
        }
        ClientError::AlreadyConnected | ClientError::NotConnected => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ClientError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ClientError::ConnectionLost | ClientError::Cancelled => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        ClientError::TableFull => CliError::new(FAILURE, format!("{context}: {err}")),
        ClientError::Device(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ClientError::Wire(err) => wire_error(context, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_timeout_code() {
        let err = client_error(
            "request failed",
            ClientError::Timeout(std::time::Duration::from_secs(1)),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn connect_failed_maps_to_connection_error() {
        let err = client_error(
            "connect failed",
            ClientError::ConnectFailed {
                host: "localhost".to_string(),
                port: 4223,
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, CONNECTION_ERROR);
    }
}
