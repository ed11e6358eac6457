//! Notifications from the bridge engine to its host
//!
//! The engine calls a [`BridgeListener`] from its own task. Implementations
//! must not block; [`ChannelListener`] forwards everything onto an unbounded
//! channel for hosts that prefer to consume events asynchronously.

use std::fmt;

use tokio::sync::mpsc;

/// Link status as reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// A connect attempt is in flight
    Connecting,
    /// Connected and polling
    Ok,
    /// The link failed or closed; a reconnect may be pending
    ConnectionError,
    /// The reconnect budget is used up; the engine is idle for good
    ReconnectExhausted,
    /// The engine was stopped by the host
    Stopped,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == Self::Ok
    }

    /// No further connect attempt will happen
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ReconnectExhausted | Self::Stopped)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Ok => "ok",
            Self::ConnectionError => "connection_failure",
            Self::ReconnectExhausted => "reconnect_exhausted",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything a listener can be told, as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    ConnectionStatusChanged(ConnectionStatus),
    CoilStateChanged { index: usize, pulse: bool, level: bool },
    WriteFailed { index: usize, value: bool, message: String },
    ReconnectExhausted { attempts: u32 },
}

/// Host callbacks. Every method defaults to a no-op.
pub trait BridgeListener: Send + Sync + 'static {
    fn on_connection_status_changed(&self, _status: ConnectionStatus) {}

    /// `pulse` is the last observed value, `level` the latch
    fn on_coil_state_changed(&self, _index: usize, _pulse: bool, _level: bool) {}

    /// A coil write reached the device but failed there, or the link dropped
    /// while it was in flight
    fn on_write_failed(&self, _index: usize, _value: bool, _message: &str) {}

    /// Reported exactly once per engine lifetime
    fn on_reconnect_exhausted(&self, _attempts: u32) {}
}

/// Listener that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl BridgeListener for NoopListener {}

/// Listener that forwards every callback as a [`BridgeEvent`]
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: BridgeEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl BridgeListener for ChannelListener {
    fn on_connection_status_changed(&self, status: ConnectionStatus) {
        self.send(BridgeEvent::ConnectionStatusChanged(status));
    }

    fn on_coil_state_changed(&self, index: usize, pulse: bool, level: bool) {
        self.send(BridgeEvent::CoilStateChanged { index, pulse, level });
    }

    fn on_write_failed(&self, index: usize, value: bool, message: &str) {
        self.send(BridgeEvent::WriteFailed {
            index,
            value,
            message: message.to_string(),
        });
    }

    fn on_reconnect_exhausted(&self, attempts: u32) {
        self.send(BridgeEvent::ReconnectExhausted { attempts });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flags() {
        assert!(ConnectionStatus::Ok.is_connected());
        assert!(!ConnectionStatus::Connecting.is_connected());
        assert!(ConnectionStatus::ReconnectExhausted.is_terminal());
        assert!(!ConnectionStatus::ConnectionError.is_terminal());
        assert_eq!(ConnectionStatus::ConnectionError.to_string(), "connection_failure");
    }

    #[test]
    fn test_channel_listener_forwards() {
        let (listener, mut rx) = ChannelListener::new();
        listener.on_connection_status_changed(ConnectionStatus::Ok);
        listener.on_coil_state_changed(3, true, true);
        listener.on_write_failed(2, false, "timeout");
        listener.on_reconnect_exhausted(100);

        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeEvent::ConnectionStatusChanged(ConnectionStatus::Ok)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeEvent::CoilStateChanged {
                index: 3,
                pulse: true,
                level: true
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), BridgeEvent::WriteFailed { index: 2, .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeEvent::ReconnectExhausted { attempts: 100 }
        );
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (listener, rx) = ChannelListener::new();
        drop(rx);
        listener.on_connection_status_changed(ConnectionStatus::Stopped);
    }
}
