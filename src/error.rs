//! Error types for the Modbus bridge
//!
//! All fallible operations return [`ModbusResult`]. Variants fall into three
//! groups that the engine treats differently:
//!
//! - **Transport failures** (`Io`, `Connection`): the socket is gone. These drive
//!   the reconnect state machine and are never returned to command callers.
//! - **Request failures** (`Timeout`, `Protocol`, `Frame`, `Exception`, ...): one
//!   request went wrong but the session may still be usable. Poll ticks that hit
//!   one of these are logged and skipped.
//! - **Terminal / configuration** (`ReconnectExhausted`, `Configuration`).

use std::io;

use thiserror::Error;

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus bridge error
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Underlying socket I/O failed
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection could not be established or was lost
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation did not complete in time
    #[error("Timeout during {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Protocol violation (unexpected function code, bad length, ...)
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Malformed MBAP frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Function code not supported by this implementation
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Request arguments out of range
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Remote device answered with a Modbus exception
    #[error("Modbus exception on function 0x{function:02X}: code 0x{code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Rejected configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Reconnect budget used up; the engine will not try again
    #[error("Maximum reconnection attempts reached ({attempts})")]
    ReconnectExhausted { attempts: u32 },

    /// Engine task is gone or an internal invariant broke
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn exception(function: u8, code: u8) -> Self {
        let message = crate::protocol::ModbusException::from_u8(code)
            .map(|exc| exc.description().to_string())
            .unwrap_or_else(|| "Unknown exception".to_string());
        Self::Exception {
            function,
            code,
            message,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn reconnect_exhausted(attempts: u32) -> Self {
        Self::ReconnectExhausted { attempts }
    }

    /// The socket is unusable and the session must be rebuilt. A bad MBAP
    /// header counts: the stream cannot be resynchronised after it.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Frame { .. }
        )
    }

    /// A retry on the same session (or a later poll tick) may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Protocol { .. } | Self::Exception { .. }
        )
    }
}

impl From<io::Error> for ModbusError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Self::timeout(err.to_string(), 0),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::connection(err.to_string()),
            _ => Self::io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ModbusError::connection("reset").is_transport_failure());
        assert!(ModbusError::io("bad fd").is_transport_failure());
        assert!(!ModbusError::timeout("read", 1000).is_transport_failure());
        assert!(ModbusError::timeout("read", 1000).is_recoverable());
        assert!(ModbusError::exception(0x01, 0x02).is_recoverable());
        assert!(!ModbusError::configuration("bad").is_recoverable());
        assert!(!ModbusError::reconnect_exhausted(3).is_recoverable());
        assert!(!ModbusError::reconnect_exhausted(3).is_transport_failure());

        let frame = ModbusError::frame("bad protocol id");
        assert!(frame.is_transport_failure());
        assert!(!frame.is_recoverable());
    }

    #[test]
    fn test_io_error_mapping() {
        let reset: ModbusError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(reset, ModbusError::Connection { .. }));

        let eof: ModbusError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(eof.is_transport_failure());

        let other: ModbusError = io::Error::other("weird").into();
        assert!(matches!(other, ModbusError::Io { .. }));
    }

    #[test]
    fn test_exception_message() {
        let err = ModbusError::exception(0x01, 0x02);
        let text = err.to_string();
        assert!(text.contains("0x01"));
        assert!(text.contains("0x02"));
        assert!(text.contains("data address"));
    }
}
