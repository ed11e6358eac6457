//! Modbus TCP server
//!
//! Serves a [`RequestDispatcher`] over TCP. One task accepts connections and
//! each client gets its own task; all of them share the dispatcher behind a
//! mutex, so every request sees and leaves the tables in a consistent state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::constants::MAX_TCP_FRAME_SIZE;
use crate::dispatcher::RequestDispatcher;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{decode_frame, encode_frame};

/// Server statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections_count: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    /// Requests answered with an exception response
    pub exception_responses: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Modbus TCP server
pub struct ModbusTcpServer {
    config: ServerConfig,
    dispatcher: Arc<Mutex<RequestDispatcher>>,
    stats: Arc<Mutex<ServerStats>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    is_running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

impl ModbusTcpServer {
    /// Validate `config` and build the tables. Nothing is bound until
    /// [`ModbusTcpServer::start`].
    pub fn new(config: ServerConfig) -> ModbusResult<Self> {
        config.validate()?;
        let dispatcher = RequestDispatcher::new(config.table_sizes());
        Ok(Self::with_dispatcher(config, dispatcher))
    }

    /// Serve an existing dispatcher, e.g. one with preloaded tables
    pub fn with_dispatcher(config: ServerConfig, dispatcher: RequestDispatcher) -> Self {
        Self {
            config,
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            stats: Arc::new(Mutex::new(ServerStats::default())),
            shutdown_tx: None,
            is_running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            accept_task: None,
        }
    }

    /// Shared handle to the tables
    pub fn dispatcher(&self) -> Arc<Mutex<RequestDispatcher>> {
        Arc::clone(&self.dispatcher)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Bound address, available once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.lock().await.clone()
    }

    /// Bind and start accepting clients. Returns the bound address.
    pub async fn start(&mut self) -> ModbusResult<SocketAddr> {
        if self.is_running() {
            return Err(ModbusError::protocol("Server is already running"));
        }

        let bind_addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            ModbusError::connection(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let client_shutdown = shutdown_tx.clone();
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        let sizes = self.config.table_sizes();
        info!("Modbus TCP server listening on {}", local_addr);
        info!(
            "Tables: {} coils, {} discrete inputs, {} holding registers, {} input registers",
            sizes.coils, sizes.discrete_inputs, sizes.holding_registers, sizes.input_registers
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let stats = Arc::clone(&self.stats);
        let is_running = Arc::clone(&self.is_running);
        self.is_running.store(true, Ordering::Relaxed);

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let dispatcher = Arc::clone(&dispatcher);
                                let stats = Arc::clone(&stats);
                                let shutdown_rx = client_shutdown.subscribe();
                                tokio::spawn(async move {
                                    handle_client(stream, peer, dispatcher, stats, shutdown_rx)
                                        .await;
                                });
                            }
                            Err(e) => error!("Failed to accept connection: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Shutdown signal received, closing listener");
                        break;
                    }
                }
            }
            is_running.store(false, Ordering::Relaxed);
        }));

        Ok(local_addr)
    }

    /// Stop accepting, disconnect every client and release the port
    pub async fn stop(&mut self) -> ModbusResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.accept_task.take() {
            task.await
                .map_err(|e| ModbusError::internal(format!("Accept task failed: {}", e)))?;
        }
        self.is_running.store(false, Ordering::Relaxed);
        info!("Modbus TCP server stopped");
        Ok(())
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Mutex<RequestDispatcher>>,
    stats: Arc<Mutex<ServerStats>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("Client connected: {}", peer);
    stats.lock().await.connections_count += 1;

    let _ = stream.set_nodelay(true);
    let mut buf = BytesMut::with_capacity(MAX_TCP_FRAME_SIZE);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Disconnecting {} on shutdown", peer);
                break;
            }
            result = stream.read_buf(&mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        stats.lock().await.bytes_received += n as u64;
                        let served = serve_frames(&mut stream, &mut buf, &dispatcher, &stats).await;
                        if let Err(e) = served {
                            warn!("Dropping client {}: {}", peer, e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Read error from {}: {}", peer, e);
                        break;
                    }
                }
            }
        }
    }

    info!("Client disconnected: {}", peer);
}

/// Answer every complete frame in `buf`; a partial frame stays buffered
async fn serve_frames(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    dispatcher: &Mutex<RequestDispatcher>,
    stats: &Mutex<ServerStats>,
) -> ModbusResult<()> {
    while let Some((header, pdu)) = decode_frame(buf)? {
        let response = dispatcher.lock().await.handle_pdu(header.unit_id, &pdu)?;
        let frame = encode_frame(header.transaction_id, header.unit_id, &response);
        stream.write_all(&frame).await?;

        let mut stats = stats.lock().await;
        stats.total_requests += 1;
        stats.bytes_sent += frame.len() as u64;
        if response.is_exception() {
            stats.exception_responses += 1;
        } else {
            stats.successful_requests += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{ModbusPdu, PduBuilder};
    use crate::table::TableSizes;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..Default::default()
        }
    }

    async fn exchange(stream: &mut TcpStream, frame: &[u8]) -> Vec<u8> {
        stream.write_all(frame).await.unwrap();
        let mut buf = BytesMut::new();
        loop {
            if let Some((_, pdu)) = decode_frame(&mut buf).unwrap() {
                return pdu.as_slice().to_vec();
            }
            let n = stream.read_buf(&mut buf).await.unwrap();
            assert!(n > 0, "server closed the connection");
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ServerConfig {
            bind_address: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(ModbusTcpServer::new(config).is_err());
    }

    #[tokio::test]
    async fn test_serves_requests_and_exceptions() {
        let mut server = ModbusTcpServer::new(loopback_config()).unwrap();
        let addr = server.start().await.unwrap();
        assert!(server.is_running());

        let mut stream = TcpStream::connect(addr).await.unwrap();

        let write = PduBuilder::build_write_single_coil(50, true).unwrap();
        let reply = exchange(&mut stream, &encode_frame(1, 1, &write)).await;
        assert_eq!(reply, write.as_slice());
        assert_eq!(server.dispatcher().lock().await.read_coils(50, 1).unwrap(), vec![true]);

        let read = PduBuilder::build_read_request(0x01, 95, 10).unwrap();
        let reply = exchange(&mut stream, &encode_frame(2, 1, &read)).await;
        assert_eq!(reply, vec![0x81, 0x02]);

        let unsupported = ModbusPdu::from_slice(&[0x06, 0x00, 0x01, 0x00, 0x01]).unwrap();
        let reply = exchange(&mut stream, &encode_frame(3, 1, &unsupported)).await;
        assert_eq!(reply, vec![0x86, 0x01]);

        let stats = server.stats().await;
        assert_eq!(stats.connections_count, 1);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.exception_responses, 2);

        server.stop().await.unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_split_and_pipelined_frames() {
        let mut server = ModbusTcpServer::new(loopback_config()).unwrap();
        let addr = server.start().await.unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let first = encode_frame(7, 1, &PduBuilder::build_read_request(0x01, 0, 8).unwrap());
        let second = encode_frame(8, 1, &PduBuilder::build_read_request(0x03, 0, 2).unwrap());

        // Half a frame, then the rest together with a second frame
        stream.write_all(&first[..4]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut rest = first[4..].to_vec();
        rest.extend_from_slice(&second);
        stream.write_all(&rest).await.unwrap();

        let mut buf = BytesMut::new();
        let mut replies = Vec::new();
        while replies.len() < 2 {
            while let Some((header, pdu)) = decode_frame(&mut buf).unwrap() {
                replies.push((header.transaction_id, pdu.as_slice().to_vec()));
            }
            if replies.len() < 2 {
                assert!(stream.read_buf(&mut buf).await.unwrap() > 0);
            }
        }
        assert_eq!(replies[0], (7, vec![0x01, 0x01, 0x00]));
        assert_eq!(replies[1], (8, vec![0x03, 0x04, 0x00, 0x00, 0x00, 0x00]));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_protocol_id_drops_client() {
        let mut server = ModbusTcpServer::with_dispatcher(
            loopback_config(),
            RequestDispatcher::new(TableSizes::default()),
        );
        let addr = server.start().await.unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(&[0x00, 0x01, 0x00, 0x05, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        let mut byte = [0u8; 1];
        let n = tokio::time::timeout(std::time::Duration::from_secs(5), stream.read(&mut byte))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        server.stop().await.unwrap();
    }
}
