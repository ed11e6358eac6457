//! Transport layer for Modbus TCP
//!
//! [`ModbusTransport`] is the seam between the application layer (requests
//! and responses) and the wire. [`TcpTransport`] is the only implementation
//! shipped; the engine owns exactly one at a time and rebuilds it on
//! reconnect, so the transport itself never reconnects.
//!
//! A zero-byte read or any socket I/O error drops the stream and surfaces as
//! [`ModbusError::Connection`]/[`ModbusError::Io`], which callers treat as a
//! transport failure. Timeouts and exception responses leave the stream in
//! place.

use std::future::Future;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::constants::MAX_TCP_FRAME_SIZE;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{decode_frame, encode_frame};
use crate::protocol::{ModbusRequest, ModbusResponse};

/// Format raw bytes as a hex string for packet logging
pub(crate) fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_packet(direction: &str, data: &[u8], slave_id: u8) {
    info!(
        "[MODBUS-TCP] {} slave:{} {}",
        direction,
        slave_id,
        format_hex_packet(data)
    );
}

/// Transport abstraction used by [`crate::client::GenericModbusClient`]
pub trait ModbusTransport: Send + Sync {
    /// Send a request and wait for the matching response.
    ///
    /// Exception responses are returned as [`ModbusError::Exception`].
    fn request(
        &mut self,
        request: &ModbusRequest,
    ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send;

    /// Whether the underlying link is believed to be up
    fn is_connected(&self) -> bool;

    /// Close the link. Idempotent.
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Transport counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Modbus TCP transport over a single persistent connection
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: String,
    timeout: Duration,
    transaction_id: u16,
    read_buf: BytesMut,
    stats: TransportStats,
    packet_logging: bool,
}

impl TcpTransport {
    /// Connect to `host:port`, giving up after `connect_timeout`
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> ModbusResult<Self> {
        let peer = format!("{}:{}", host, port);
        debug!("Connecting to {}", peer);

        let stream = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ModbusError::connection(format!(
                    "Failed to connect to {}: {}",
                    peer, e
                )))
            }
            Err(_) => {
                return Err(ModbusError::connection(format!(
                    "Connect to {} timed out after {}ms",
                    peer,
                    connect_timeout.as_millis()
                )))
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", peer, e);
        }

        Ok(Self {
            stream: Some(stream),
            peer,
            timeout: connect_timeout,
            transaction_id: 0,
            read_buf: BytesMut::with_capacity(MAX_TCP_FRAME_SIZE),
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Per-request timeout (defaults to the connect timeout)
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.timeout = request_timeout;
        self
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// `host:port` this transport is connected to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Drop the stream after a socket failure
    fn mark_broken(&mut self, err: ModbusError) -> ModbusError {
        warn!("Transport to {} failed: {}", self.peer, err);
        self.stream = None;
        self.read_buf.clear();
        self.stats.errors += 1;
        err
    }

    async fn send_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let request_timeout = self.timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(ModbusError::connection("Not connected"));
        };

        match timeout(request_timeout, stream.write_all(frame)).await {
            Ok(Ok(())) => {
                self.stats.requests_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Ok(Err(e)) => Err(self.mark_broken(e.into())),
            Err(_) => {
                // A partly written frame leaves the stream out of step
                self.stats.timeouts += 1;
                Err(self.mark_broken(ModbusError::connection(format!(
                    "Send to {} timed out after {}ms",
                    self.peer,
                    self.timeout_ms()
                ))))
            }
        }
    }

    /// Read until a frame with `transaction_id` arrives or the deadline passes.
    /// Frames carrying other transaction ids are stale and skipped.
    async fn receive_matching(&mut self, transaction_id: u16) -> ModbusResult<ModbusResponse> {
        let deadline = Instant::now() + self.timeout;

        loop {
            match decode_frame(&mut self.read_buf) {
                Ok(Some((header, pdu))) => {
                    if self.packet_logging {
                        let raw = encode_frame(header.transaction_id, header.unit_id, &pdu);
                        log_packet("receive", &raw, header.unit_id);
                    }
                    if header.transaction_id != transaction_id {
                        debug!(
                            "Skipping stale response: txn {} (expected {})",
                            header.transaction_id, transaction_id
                        );
                        continue;
                    }
                    self.stats.responses_received += 1;
                    return ModbusResponse::from_pdu(header.unit_id, &pdu);
                }
                Ok(None) => {}
                // Cannot find the next frame boundary after a bad header
                Err(e) => return Err(self.mark_broken(e)),
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(ModbusError::connection("Not connected"));
            };
            let read = tokio::time::timeout_at(deadline, stream.read_buf(&mut self.read_buf)).await;
            match read {
                Ok(Ok(0)) => {
                    return Err(self.mark_broken(ModbusError::connection(format!(
                        "Connection closed by {}",
                        self.peer
                    ))))
                }
                Ok(Ok(n)) => self.stats.bytes_received += n as u64,
                Ok(Err(e)) => return Err(self.mark_broken(e.into())),
                Err(_) => {
                    self.stats.timeouts += 1;
                    self.stats.errors += 1;
                    return Err(ModbusError::timeout("read response", self.timeout_ms()));
                }
            }
        }
    }
}

impl ModbusTransport for TcpTransport {
    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        if self.stream.is_none() {
            return Err(ModbusError::connection("Not connected"));
        }

        let pdu = request.to_pdu()?;
        let transaction_id = self.next_transaction_id();
        let frame = encode_frame(transaction_id, request.slave_id, &pdu);

        if self.packet_logging {
            log_packet("send", &frame, request.slave_id);
        }

        self.send_frame(&frame).await?;
        let response = self.receive_matching(transaction_id).await?;

        if response.function != request.function {
            self.stats.errors += 1;
            return Err(ModbusError::protocol(format!(
                "Function code mismatch: sent {}, received {}",
                request.function, response.function
            )));
        }

        if let Some(error) = response.get_exception() {
            self.stats.errors += 1;
            return Err(error);
        }

        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing connection to {}", self.peer);
            let _ = stream.shutdown().await;
        }
        self.read_buf.clear();
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::PduBuilder;
    use crate::protocol::ModbusFunction;
    use tokio::net::TcpListener;

    #[test]
    fn test_hex_format() {
        assert_eq!(format_hex_packet(&[0x00, 0x0A, 0xFF]), "00 0A FF");
        assert_eq!(format_hex_packet(&[]), "");
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, port) = listener().await;
        drop(listener);
        let result = TcpTransport::connect("127.0.0.1", port, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(ModbusError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_skips_stale_transaction() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 12];
            socket.read_exact(&mut buf).await.unwrap();
            let txn = u16::from_be_bytes([buf[0], buf[1]]);

            let reply = PduBuilder::build_bits_response(0x01, &[true, false, true]).unwrap();
            // A late answer to an earlier request first, then the real one
            socket
                .write_all(&encode_frame(txn.wrapping_add(100), 1, &reply))
                .await
                .unwrap();
            socket.write_all(&encode_frame(txn, 1, &reply)).await.unwrap();
            socket
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 0, 3);
        let response = transport.request(&request).await.unwrap();
        let bits = response.parse_bits().unwrap();
        assert_eq!(&bits[..3], &[true, false, true]);

        let stats = transport.get_stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        server.await.unwrap();

        let request = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 0, 8);
        let err = transport.request(&request).await.unwrap_err();
        assert!(err.is_transport_failure(), "unexpected error: {}", err);
        assert!(!transport.is_connected());

        // Further requests fail fast
        let err = transport.request(&request).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_exception_keeps_connection() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 12];
            socket.read_exact(&mut buf).await.unwrap();
            let txn = u16::from_be_bytes([buf[0], buf[1]]);
            let reply = PduBuilder::build_exception(0x01, 0x02).unwrap();
            socket.write_all(&encode_frame(txn, 1, &reply)).await.unwrap();
            socket
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 95, 10);
        let err = transport.request(&request).await.unwrap_err();
        assert!(matches!(err, ModbusError::Exception { code: 0x02, .. }));
        assert!(transport.is_connected());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_header_drops_stream() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 12];
            socket.read_exact(&mut buf).await.unwrap();
            let reply = PduBuilder::build_bits_response(0x01, &[true]).unwrap();
            let mut frame = encode_frame(u16::from_be_bytes([buf[0], buf[1]]), 1, &reply);
            // Protocol id must be zero
            frame[2] = 0x12;
            socket.write_all(&frame).await.unwrap();
            socket
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 0, 1);
        let err = transport.request(&request).await.unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }), "unexpected error: {}", err);
        assert!(err.is_transport_failure());
        assert!(!transport.is_connected());
        assert_eq!(transport.get_stats().errors, 1);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_send_timeout_drops_stream() {
        let (listener, port) = listener().await;
        // Accept and never read, so the socket buffers fill up
        let server = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_millis(200))
            .await
            .unwrap();
        let oversized = vec![0u8; 64 * 1024 * 1024];
        let err = transport.send_frame(&oversized).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }), "unexpected error: {}", err);
        assert!(!transport.is_connected());

        let stats = transport.get_stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.requests_sent, 0);
        drop(server.await.unwrap());
    }
}
