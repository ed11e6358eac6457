//! Host-facing handle to the coil bridge engine
//!
//! [`CoilBridge::start`] validates the configuration, spawns the engine task
//! and returns a cheap handle. All operations are messages to that task, so
//! the host never shares state with the engine.
//!
//! ```rust,no_run
//! use modbus_bridge::{BridgeConfig, ChannelListener, CoilBridge, ModbusResult};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let (listener, mut events) = ChannelListener::new();
//!     let bridge = CoilBridge::start(BridgeConfig::new("192.168.1.50", 502), listener)?;
//!
//!     bridge.write_coil(3, true).await?;
//!     if let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     bridge.stop().await
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::connection::ConnectionManager;
use crate::error::{ModbusError, ModbusResult};
use crate::events::{BridgeListener, ConnectionStatus};
use crate::logging::{CallbackLogger, LogCallback, LoggingMode};

const COMMAND_QUEUE_DEPTH: usize = 64;

/// What happened to a coil write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Acknowledged by the device and recorded locally
    Applied,
    /// Dropped because the link is not up; writes are never queued
    NotConnected,
    /// Index outside `[0, num_coils)`
    OutOfRange,
    /// Sent but failed; the listener was told why
    Failed,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSnapshot {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub reconnect_pending: bool,
    pub pulses: Vec<bool>,
    pub levels: Vec<bool>,
}

pub(crate) enum Command {
    WriteCoil {
        index: usize,
        value: bool,
        reply: oneshot::Sender<WriteOutcome>,
    },
    ToggleCoil {
        index: usize,
        reply: oneshot::Sender<WriteOutcome>,
    },
    ResetLevelLatches {
        reply: oneshot::Sender<()>,
    },
    PollNow {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<BridgeSnapshot>,
    },
    Reconfigure {
        config: Box<BridgeConfig>,
        reply: oneshot::Sender<ModbusResult<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running engine. Dropping it stops the engine.
pub struct CoilBridge {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl CoilBridge {
    /// Validate `config` and start the engine on the current tokio runtime.
    /// The first connect attempt starts immediately.
    pub fn start<L: BridgeListener>(config: BridgeConfig, listener: L) -> ModbusResult<Self> {
        Self::spawn(config, Arc::new(listener), CallbackLogger::default())
    }

    /// Like [`CoilBridge::start`], also forwarding log lines to `callback`
    pub fn start_with_log_callback<L: BridgeListener>(
        config: BridgeConfig,
        listener: L,
        callback: LogCallback,
    ) -> ModbusResult<Self> {
        let logger =
            CallbackLogger::new(Some(callback), LoggingMode::from_debug_flag(config.debug));
        Self::spawn(config, Arc::new(listener), logger)
    }

    fn spawn(
        config: BridgeConfig,
        listener: Arc<dyn BridgeListener>,
        logger: CallbackLogger,
    ) -> ModbusResult<Self> {
        config.validate()?;
        debug!(
            "Starting coil bridge for {}:{} ({} coils)",
            config.host, config.port, config.num_coils
        );

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let manager = ConnectionManager::new(config, listener, logger);
        let task = tokio::spawn(manager.run(rx));
        Ok(Self { commands: tx, task })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> ModbusResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ModbusError::internal("Bridge engine is not running"))?;
        response
            .await
            .map_err(|_| ModbusError::internal("Bridge engine dropped the request"))
    }

    /// Write one coil. Transport problems are reported through the listener
    /// and the outcome, never as an error; `Err` means the engine is gone.
    pub async fn write_coil(&self, index: usize, value: bool) -> ModbusResult<WriteOutcome> {
        self.request(|reply| Command::WriteCoil { index, value, reply })
            .await
    }

    /// Write the inverse of the coil's last known pulse value
    pub async fn toggle_coil(&self, index: usize) -> ModbusResult<WriteOutcome> {
        self.request(|reply| Command::ToggleCoil { index, reply }).await
    }

    /// Numeric form of [`CoilBridge::write_coil`]: `1` is ON, `0` is OFF
    pub async fn set_coil_state(&self, index: usize, state: u8) -> ModbusResult<WriteOutcome> {
        let value = match state {
            0 => false,
            1 => true,
            other => {
                return Err(ModbusError::invalid_data(format!(
                    "Coil state must be 0 or 1, got {}",
                    other
                )))
            }
        };
        self.write_coil(index, value).await
    }

    /// Clear every level latch
    pub async fn reset_level_latches(&self) -> ModbusResult<()> {
        self.request(|reply| Command::ResetLevelLatches { reply })
            .await
    }

    /// Poll immediately instead of waiting for the next tick.
    /// Returns whether the read succeeded.
    pub async fn poll_now(&self) -> ModbusResult<bool> {
        self.request(|reply| Command::PollNow { reply }).await
    }

    pub async fn snapshot(&self) -> ModbusResult<BridgeSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Apply a new configuration.
    ///
    /// A new coil count resets pulses and latches to all-false without
    /// touching the connection. A new host or port reconnects, unless the
    /// reconnect budget is already spent: that returns
    /// [`ModbusError::ReconnectExhausted`] and changes nothing.
    pub async fn reconfigure(&self, config: BridgeConfig) -> ModbusResult<()> {
        config.validate()?;
        self.request(|reply| Command::Reconfigure {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    /// Stop the engine: cancel the poll and reconnect timers, close the
    /// socket, then wait for the task to finish.
    pub async fn stop(self) -> ModbusResult<()> {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_ok() {
            let _ = done.await;
        }
        self.task
            .await
            .map_err(|e| ModbusError::internal(format!("Bridge engine panicked: {}", e)))
    }

    /// Whether the engine task is still alive
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
