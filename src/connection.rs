//! Client connection management
//!
//! Split in two:
//!
//! - [`ConnectionStateMachine`]: pure transition logic. Every handler takes
//!   an event and returns the [`LinkAction`]s to perform, in order. It owns
//!   the attempt counter and knows whether a reconnect timer is armed, but
//!   performs no I/O.
//! - [`ConnectionManager`]: the engine task. It owns the socket, the poll
//!   timer, the reconnect timer and the coil tracker, feeds events into the
//!   state machine and carries out the resulting actions.
//!
//! ```text
//!   Disconnected --request_connect--> Connecting --on_connected--> Connected
//!        ^                                 |                           |
//!        +----------on_link_down-----------+---------------------------+
//! ```

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Sleep};

use crate::bridge::{BridgeSnapshot, Command, WriteOutcome};
use crate::client::{ModbusClient, ModbusTcpClient};
use crate::config::BridgeConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::events::{BridgeListener, ConnectionStatus};
use crate::logging::{CallbackLogger, LoggingMode};
use crate::scheduler::PollingScheduler;
use crate::tracker::{CoilStateChange, CoilStateTracker};

// ============================================================================
// State machine
// ============================================================================

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Open a new socket to the configured endpoint
    Connect,
    ReportStatus(ConnectionStatus),
    StartPolling,
    StopPolling,
    /// Close the socket and abandon any connect in flight
    CloseSocket,
    /// Arm the one-shot reconnect timer
    ArmReconnect(Duration),
    CancelReconnect,
    ReportExhausted { attempts: u32 },
}

/// Reconnect state machine
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: LinkState,
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
    connect_in_flight: bool,
    reconnect_armed: bool,
    exhausted: bool,
    stopped: bool,
}

impl ConnectionStateMachine {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            state: LinkState::Disconnected,
            attempts: 0,
            max_attempts,
            delay,
            connect_in_flight: false,
            reconnect_armed: false,
            exhausted: false,
            stopped: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Reconnect attempts since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_reconnect_armed(&self) -> bool {
        self.reconnect_armed
    }

    pub fn is_connect_in_flight(&self) -> bool {
        self.connect_in_flight
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Takes effect at the next reconnect scheduling
    pub fn set_policy(&mut self, max_attempts: u32, delay: Duration) {
        self.max_attempts = max_attempts;
        self.delay = delay;
    }

    /// Enter `Connecting`. A no-op while a connect is already in flight, while
    /// connected, and once stopped or exhausted.
    pub fn request_connect(&mut self) -> Vec<LinkAction> {
        if self.stopped || self.exhausted || self.connect_in_flight || self.is_connected() {
            return Vec::new();
        }
        self.state = LinkState::Connecting;
        self.connect_in_flight = true;
        vec![
            LinkAction::ReportStatus(ConnectionStatus::Connecting),
            LinkAction::Connect,
        ]
    }

    /// The socket connected
    pub fn on_connected(&mut self) -> Vec<LinkAction> {
        if self.state != LinkState::Connecting || self.stopped {
            return Vec::new();
        }
        self.state = LinkState::Connected;
        self.attempts = 0;
        self.connect_in_flight = false;
        vec![
            LinkAction::ReportStatus(ConnectionStatus::Ok),
            LinkAction::StartPolling,
        ]
    }

    /// The socket failed to connect, errored or closed.
    ///
    /// A second notification for a link that is already down (an error
    /// followed by a close, say) changes nothing.
    pub fn on_link_down(&mut self) -> Vec<LinkAction> {
        if self.stopped || self.exhausted || self.state == LinkState::Disconnected {
            return Vec::new();
        }
        self.state = LinkState::Disconnected;
        self.connect_in_flight = false;

        let mut actions = vec![
            LinkAction::ReportStatus(ConnectionStatus::ConnectionError),
            LinkAction::StopPolling,
            LinkAction::CloseSocket,
        ];
        actions.extend(self.schedule_reconnect());
        actions
    }

    /// The armed reconnect timer fired
    pub fn on_reconnect_timer_fired(&mut self) -> Vec<LinkAction> {
        if !self.reconnect_armed {
            return Vec::new();
        }
        self.reconnect_armed = false;
        self.request_connect()
    }

    /// Drop the current link and connect again with a fresh attempt budget.
    /// Used when the endpoint changes.
    pub fn restart(&mut self) -> Vec<LinkAction> {
        if self.stopped || self.exhausted {
            return Vec::new();
        }
        let mut actions = vec![LinkAction::StopPolling];
        if self.reconnect_armed {
            self.reconnect_armed = false;
            actions.push(LinkAction::CancelReconnect);
        }
        actions.push(LinkAction::CloseSocket);
        self.state = LinkState::Disconnected;
        self.connect_in_flight = false;
        self.attempts = 0;
        actions.extend(self.request_connect());
        actions
    }

    /// Engine shutdown: poll timer, reconnect timer, socket, in that order
    pub fn shutdown(&mut self) -> Vec<LinkAction> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        self.state = LinkState::Disconnected;
        self.connect_in_flight = false;

        let mut actions = vec![LinkAction::StopPolling];
        if self.reconnect_armed {
            self.reconnect_armed = false;
            actions.push(LinkAction::CancelReconnect);
        }
        actions.push(LinkAction::CloseSocket);
        actions.push(LinkAction::ReportStatus(ConnectionStatus::Stopped));
        actions
    }

    fn schedule_reconnect(&mut self) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        if self.reconnect_armed {
            self.reconnect_armed = false;
            actions.push(LinkAction::CancelReconnect);
        }

        if self.attempts >= self.max_attempts {
            self.exhausted = true;
            actions.push(LinkAction::ReportStatus(ConnectionStatus::ReconnectExhausted));
            actions.push(LinkAction::ReportExhausted {
                attempts: self.attempts,
            });
            return actions;
        }

        self.attempts += 1;
        self.reconnect_armed = true;
        actions.push(LinkAction::ArmReconnect(self.delay));
        actions
    }
}

// ============================================================================
// Engine task
// ============================================================================

type ConnectFuture = Pin<Box<dyn Future<Output = ModbusResult<ModbusTcpClient>> + Send>>;

/// Await an optional future; pending forever when absent
async fn wait_opt<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

/// Owns the socket, timers and coil state for one engine lifetime
pub(crate) struct ConnectionManager {
    config: BridgeConfig,
    fsm: ConnectionStateMachine,
    status: ConnectionStatus,
    client: Option<ModbusTcpClient>,
    connecting: Option<ConnectFuture>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    scheduler: PollingScheduler,
    tracker: CoilStateTracker,
    listener: Arc<dyn BridgeListener>,
    logger: CallbackLogger,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: BridgeConfig,
        listener: Arc<dyn BridgeListener>,
        logger: CallbackLogger,
    ) -> Self {
        let mut logger = logger;
        logger.set_mode(LoggingMode::from_debug_flag(config.debug));
        Self {
            fsm: ConnectionStateMachine::new(
                config.max_reconnect_attempts,
                config.reconnect_delay(),
            ),
            status: ConnectionStatus::Connecting,
            client: None,
            connecting: None,
            reconnect_timer: None,
            scheduler: PollingScheduler::new(config.poll_interval()),
            tracker: CoilStateTracker::new(config.num_coils as usize),
            listener,
            logger,
            config,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let actions = self.fsm.request_connect();
        self.apply(actions).await;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        // Every handle dropped
                        self.shutdown().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                result = wait_opt(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                _ = wait_opt(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.logger.info(&format!(
                        "Reconnect attempt {}/{}",
                        self.fsm.attempts(),
                        self.config.max_reconnect_attempts
                    ));
                    let actions = self.fsm.on_reconnect_timer_fired();
                    self.apply(actions).await;
                }
                _ = self.scheduler.tick() => {
                    self.poll().await;
                }
            }
        }
    }

    /// Returns false once the engine should exit
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::WriteCoil { index, value, reply } => {
                let outcome = self.write_coil(index, value).await;
                let _ = reply.send(outcome);
            }
            Command::ToggleCoil { index, reply } => {
                let outcome = match self.tracker.pulse(index) {
                    Some(current) => self.write_coil(index, !current).await,
                    None => WriteOutcome::OutOfRange,
                };
                let _ = reply.send(outcome);
            }
            Command::ResetLevelLatches { reply } => {
                let changes = self.tracker.reset_all();
                self.logger.info("Level states reset");
                self.publish(&changes);
                let _ = reply.send(());
            }
            Command::PollNow { reply } => {
                let polled = self.poll().await;
                let _ = reply.send(polled);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Reconfigure { config, reply } => {
                let _ = reply.send(self.reconfigure(*config).await);
            }
            Command::Stop { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn apply(&mut self, actions: Vec<LinkAction>) {
        for action in actions {
            match action {
                LinkAction::Connect => {
                    self.logger.info(&format!(
                        "Connecting to Modbus server at {}:{}",
                        self.config.host, self.config.port
                    ));
                    let host = self.config.host.clone();
                    let port = self.config.port;
                    let timeout = self.config.request_timeout();
                    self.connecting = Some(Box::pin(async move {
                        ModbusTcpClient::connect(&host, port, timeout).await
                    }));
                }
                LinkAction::ReportStatus(status) => {
                    self.status = status;
                    self.listener.on_connection_status_changed(status);
                }
                LinkAction::StartPolling => self.scheduler.start(),
                LinkAction::StopPolling => self.scheduler.stop(),
                LinkAction::CloseSocket => {
                    self.connecting = None;
                    if let Some(mut client) = self.client.take() {
                        let _ = client.close().await;
                    }
                }
                LinkAction::ArmReconnect(delay) => {
                    self.reconnect_timer = Some(Box::pin(sleep(delay)));
                }
                LinkAction::CancelReconnect => self.reconnect_timer = None,
                LinkAction::ReportExhausted { attempts } => {
                    let err = ModbusError::reconnect_exhausted(attempts);
                    self.logger.error(&format!("{}, giving up", err));
                    self.listener.on_reconnect_exhausted(attempts);
                }
            }
        }
    }

    async fn on_connect_result(&mut self, result: ModbusResult<ModbusTcpClient>) {
        match result {
            Ok(mut client) => {
                client.set_packet_logging(self.config.debug);
                client.set_logger(Some(self.logger.clone()));
                self.client = Some(client);
                self.logger.info(&format!(
                    "Connected to Modbus server at {}:{}",
                    self.config.host, self.config.port
                ));
                let actions = self.fsm.on_connected();
                self.apply(actions).await;
            }
            Err(e) => {
                self.logger.error(&format!("Socket error: {}", e));
                self.link_down().await;
            }
        }
    }

    async fn link_down(&mut self) {
        let actions = self.fsm.on_link_down();
        self.apply(actions).await;
    }

    /// One read of `[0, num_coils)`. Returns whether it succeeded.
    async fn poll(&mut self) -> bool {
        if !self.fsm.is_connected() {
            return false;
        }
        let Some(client) = self.client.as_mut() else {
            return false;
        };

        let quantity = self.tracker.len() as u16;
        match client.read_01(self.config.unit_id, 0, quantity).await {
            Ok(states) => {
                let changes = self.tracker.update(&states);
                self.publish(&changes);
                true
            }
            Err(e) if e.is_recoverable() => {
                // Session survives; the next tick retries
                self.logger.error(&format!("Failed to poll coils: {}", e));
                false
            }
            Err(e) => {
                self.logger.error(&format!("Failed to poll coils: {}", e));
                if e.is_transport_failure() {
                    self.link_down().await;
                }
                false
            }
        }
    }

    async fn write_coil(&mut self, index: usize, value: bool) -> WriteOutcome {
        if index >= self.tracker.len() {
            return WriteOutcome::OutOfRange;
        }
        if !self.fsm.is_connected() {
            self.logger
                .debug(&format!("Dropping write to coil {}: not connected", index));
            return WriteOutcome::NotConnected;
        }
        let Some(client) = self.client.as_mut() else {
            return WriteOutcome::NotConnected;
        };

        match client.write_05(self.config.unit_id, index as u16, value).await {
            Ok(()) => {
                if let Some(change) = self.tracker.set_coil(index, value) {
                    self.publish(&[change]);
                }
                self.logger.info(&format!("Set coil {} to {}", index, value));
                WriteOutcome::Applied
            }
            Err(e) => {
                let message = e.to_string();
                self.logger
                    .error(&format!("Failed to set coil {}: {}", index, message));
                self.listener.on_write_failed(index, value, &message);
                if e.is_transport_failure() {
                    self.link_down().await;
                }
                WriteOutcome::Failed
            }
        }
    }

    async fn reconfigure(&mut self, config: BridgeConfig) -> ModbusResult<()> {
        config.validate()?;
        let endpoint_changed = self.config.endpoint_differs(&config);
        if endpoint_changed && self.fsm.is_exhausted() {
            // The budget is spent; stop() and start() begin a new engine
            return Err(ModbusError::reconnect_exhausted(self.fsm.attempts()));
        }
        self.logger.info("Config updated");

        let coils_changed = config.num_coils != self.config.num_coils;

        self.logger.set_mode(LoggingMode::from_debug_flag(config.debug));
        if let Some(client) = self.client.as_mut() {
            client.set_packet_logging(config.debug);
            client.set_logger(Some(self.logger.clone()));
        }
        self.scheduler.set_period(config.poll_interval());
        self.fsm
            .set_policy(config.max_reconnect_attempts, config.reconnect_delay());
        self.config = config;

        if coils_changed {
            self.tracker.resize(self.config.num_coils as usize);
            for index in 0..self.tracker.len() {
                self.listener.on_coil_state_changed(index, false, false);
            }
        }

        if endpoint_changed {
            self.logger.info(&format!(
                "Endpoint changed, reconnecting to {}:{}",
                self.config.host, self.config.port
            ));
            let actions = self.fsm.restart();
            self.apply(actions).await;
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.logger.debug("destroy");
        let actions = self.fsm.shutdown();
        self.apply(actions).await;
    }

    fn publish(&self, changes: &[CoilStateChange]) {
        for change in changes {
            self.listener
                .on_coil_state_changed(change.index, change.pulse, change.level);
        }
    }

    fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            status: self.status,
            reconnect_attempts: self.fsm.attempts(),
            reconnect_pending: self.fsm.is_reconnect_armed(),
            pulses: self.tracker.pulses().to_vec(),
            levels: self.tracker.levels().to_vec(),
        }
    }
}
