//! # Modbus Bridge - Coil Bridge Engine and Modbus TCP Server
//!
//! A Modbus TCP coil bridge built on tokio. Two roles share one wire layer:
//!
//! - **Client engine** ([`CoilBridge`]): keeps one session to a Modbus server,
//!   polls a block of coils on an interval, turns the readings into pulse and
//!   level-latch state for the host, writes single coils on request and
//!   reconnects with a bounded number of attempts when the link drops.
//! - **Server** ([`ModbusTcpServer`]): serves four fixed-size tables through a
//!   [`RequestDispatcher`], answering out-of-range requests with exception
//!   responses instead of touching the tables.
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client | Server |
//! |------|----------|--------|--------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_bridge::{BridgeConfig, BridgeEvent, ChannelListener, CoilBridge, ModbusResult};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let (listener, mut events) = ChannelListener::new();
//!     let bridge = CoilBridge::start(BridgeConfig::new("127.0.0.1", 502), listener)?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let BridgeEvent::CoilStateChanged { index, pulse, level } = event {
//!             println!("coil {}: pulse={} level={}", index, pulse, level);
//!         }
//!     }
//!
//!     bridge.stop().await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants and bridge defaults
pub mod constants;

/// Stack-allocated PDU and PDU builders
pub mod pdu;

/// MBAP framing for Modbus TCP
pub mod frame;

/// Modbus protocol definitions and message handling
pub mod protocol;

/// Network transport layer
pub mod transport;

/// Modbus client implementations
pub mod client;

/// Logging gate and callback logger
pub mod logging;

/// Bridge and server configuration
pub mod config;

// ============================================================================
// Server role
// ============================================================================

/// Address range validation
pub mod validator;

/// Coil, discrete input and register tables
pub mod table;

/// Request dispatch over the tables
pub mod dispatcher;

/// Modbus TCP server
pub mod server;

// ============================================================================
// Client engine
// ============================================================================

/// Pulse and level latch tracking
pub mod tracker;

/// Poll timer
pub mod scheduler;

/// Reconnect state machine and engine task
pub mod connection;

/// Listener callbacks and status
pub mod events;

/// Engine handle
pub mod bridge;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use modbus_bridge::tokio) ===
pub use tokio;

// === Engine API ===
pub use bridge::{BridgeSnapshot, CoilBridge, WriteOutcome};
pub use config::{BridgeConfig, ServerConfig};
pub use events::{BridgeEvent, BridgeListener, ChannelListener, ConnectionStatus, NoopListener};
pub use tracker::{CoilStateChange, CoilStateTracker};

// === Server API ===
pub use dispatcher::RequestDispatcher;
pub use server::{ModbusTcpServer, ServerStats};
pub use table::{DataTable, TableSizes};

// === Core client API ===
pub use client::{GenericModbusClient, ModbusClient, ModbusTcpClient};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};

// === Monitoring ===
pub use transport::{ModbusTransport, TcpTransport, TransportStats};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

// === PDU (advanced usage) ===
pub use frame::{decode_frame, encode_frame, MbapHeader};
pub use pdu::{ModbusPdu, PduBuilder};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = constants::DEFAULT_TCP_PORT;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Bridge v{} - Modbus TCP coil bridge and server", VERSION)
}
