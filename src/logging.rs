//! Operator-facing logging
//!
//! The bridge has a single "debug logging" switch. With it off only errors
//! are emitted; with it on everything is. [`CallbackLogger`] applies that
//! gate, emits through `tracing`, and optionally forwards a timestamped line
//! to a host callback.

use std::fmt;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, error, info, trace, warn};

use crate::pdu::ModbusPdu;
use crate::transport::format_hex_packet;

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        };
        f.write_str(s)
    }
}

/// Which levels get through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// Nothing is emitted
    Silent,
    /// Only `Error` (debug switch off)
    #[default]
    ErrorsOnly,
    /// Every level (debug switch on)
    Debug,
}

impl LoggingMode {
    pub fn from_debug_flag(debug: bool) -> Self {
        if debug {
            Self::Debug
        } else {
            Self::ErrorsOnly
        }
    }

    pub fn allows(self, level: LogLevel) -> bool {
        match self {
            Self::Silent => false,
            Self::ErrorsOnly => level == LogLevel::Error,
            Self::Debug => true,
        }
    }
}

/// Host callback receiving `(level, formatted line)`
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Gated logger with an optional host callback
#[derive(Clone, Default)]
pub struct CallbackLogger {
    callback: Option<LogCallback>,
    mode: LoggingMode,
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("mode", &self.mode)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl CallbackLogger {
    pub fn new(callback: Option<LogCallback>, mode: LoggingMode) -> Self {
        Self { callback, mode }
    }

    /// Logger without a callback, gated by the debug switch
    pub fn from_debug_flag(debug: bool) -> Self {
        Self::new(None, LoggingMode::from_debug_flag(debug))
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn set_callback(&mut self, callback: Option<LogCallback>) {
        self.callback = callback;
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.mode.allows(level)
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.is_enabled(level) {
            return;
        }

        match level {
            LogLevel::Error => error!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Trace => trace!("{}", message),
        }

        if let Some(callback) = &self.callback {
            let line = format!(
                "[{}] {} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level,
                message
            );
            callback(level, &line);
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Outgoing request summary
    pub fn log_request(
        &self,
        slave_id: u8,
        function: u8,
        address: u16,
        quantity: u16,
        data: &[u8],
    ) {
        if !self.is_enabled(LogLevel::Debug) {
            return;
        }
        let mut line = format!(
            "-> slave={} fc=0x{:02X} ({}) addr={} qty={}",
            slave_id,
            function,
            ModbusPdu::function_code_description(function),
            address,
            quantity
        );
        if !data.is_empty() {
            line.push_str(&format!(" data=[{}]", format_hex_packet(data)));
        }
        self.debug(&line);
    }

    /// Incoming response summary
    pub fn log_response(&self, slave_id: u8, function: u8, data: &[u8]) {
        if !self.is_enabled(LogLevel::Debug) {
            return;
        }
        self.debug(&format!(
            "<- slave={} fc=0x{:02X} data=[{}]",
            slave_id,
            function,
            format_hex_packet(data)
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capturing(mode: LoggingMode) -> (CallbackLogger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let callback: LogCallback = Arc::new(move |level, line| {
            sink.lock().unwrap().push((level, line.to_string()));
        });
        (CallbackLogger::new(Some(callback), mode), lines)
    }

    #[test]
    fn test_errors_only_gate() {
        let (logger, lines) = capturing(LoggingMode::ErrorsOnly);
        logger.debug("poll tick");
        logger.info("connected");
        logger.error("connection refused");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, LogLevel::Error);
        assert!(lines[0].1.contains("ERROR connection refused"));
    }

    #[test]
    fn test_debug_mode_passes_everything() {
        let (logger, lines) = capturing(LoggingMode::from_debug_flag(true));
        logger.debug("a");
        logger.warn("b");
        logger.log_request(1, 0x01, 0, 48, &[]);
        logger.log_response(1, 0x01, &[0x06, 0x01]);
        assert_eq!(lines.lock().unwrap().len(), 4);
        assert!(lines.lock().unwrap()[3].1.contains("06 01"));
    }

    #[test]
    fn test_silent_and_toggle() {
        let (mut logger, lines) = capturing(LoggingMode::Silent);
        logger.error("dropped");
        assert!(lines.lock().unwrap().is_empty());

        logger.set_mode(LoggingMode::Debug);
        logger.info("kept");
        assert_eq!(lines.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_default_is_errors_only() {
        assert_eq!(CallbackLogger::default().mode(), LoggingMode::ErrorsOnly);
        assert!(!CallbackLogger::default().is_enabled(LogLevel::Warn));
    }
}
