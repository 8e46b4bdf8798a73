//! Connection Handler Module
//!
//! Each accepted client gets its own task running this loop: read bytes,
//! decode one top-level RESP array, dispatch it, write the reply. A
//! connection that issues MONITOR switches, after that reply, into a
//! separate forwarding loop that echoes every other client's commands
//! instead of accepting further requests of its own.
//!
//! ## Buffer Management
//!
//! We use a BytesMut buffer to accumulate incoming data. This is important
//! because TCP is a stream protocol - we might receive partial commands,
//! or multiple commands in a single read.

use crate::commands::{ClientSession, CommandHandler};
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection: the read buffer, parsing, dispatch,
/// and response sending for one connected client.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    command_handler: CommandHandler,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
    session: ClientSession,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            stats,
            session: ClientSession::new(addr.to_string()),
        }
    }

    /// Runs the main connection loop until the client disconnects, a decode
    /// error other than clean EOF occurs, or the connection switches into
    /// MONITOR mode and that feed closes.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err) if io_err.kind() == std::io::ErrorKind::ConnectionReset => {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        if let Some(id) = self.session.monitor_id {
            self.command_handler.monitors().unregister(id);
        }
        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(command) = self.try_parse_command()? {
                let response = self.command_handler.execute(&mut self.session, command);
                self.send_response(&response).await?;

                if self.session.is_monitoring() {
                    return self.monitor_loop().await;
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Once a connection issues MONITOR it stops accepting further requests
    /// of its own and instead just forwards whatever the monitor feed hands
    /// it, until that feed closes (on unregister) or the socket drops.
    async fn monitor_loop(&mut self) -> Result<(), ConnectionError> {
        let mut rx = self.session.monitor_rx.take().expect("is_monitoring implies monitor_rx is set");
        while let Some(line) = rx.recv().await {
            self.stream.write_all(&line).await?;
            self.stream.flush().await?;
            self.stats.bytes_written(line.len());
        }
        Ok(())
    }

    fn try_parse_command(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(value))
            }
            Ok(None) => {
                trace!(client = %self.addr, buffered = self.buffer.len(), "Incomplete command, need more data");
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Parse error");
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.addr, size = self.buffer.len(), "Buffer size limit exceeded");
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            // Clean EOF with a partial frame sitting in the buffer: ask the
            // parser whether it's a genuinely truncated frame (ShortRead) or
            // just nothing at all (UnexpectedEof), rather than assuming.
            return Err(ConnectionError::ParseError(self.parser.on_eof(&self.buffer)));
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Accepts a single client connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err) if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::ServerState;
    use crate::storage::StorageEngine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            let state = Arc::new(ServerState::new(
                Config::default(),
                Arc::new(StorageEngine::new()),
                None,
                Arc::clone(&stats_clone),
            ));
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&state));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, stats)
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();

        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$4\r\nAriz\r\n");
    }

    #[tokio::test]
    async fn test_multiple_commands() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();

        let mut buf = vec![0u8; 256];
        let mut total = 0;
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(2);

        while total < 30 && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(tokio::time::Duration::from_millis(100), client.read(&mut buf[total..])).await
            {
                Ok(Ok(n)) if n > 0 => total += n,
                _ => break,
            }
        }

        let response = String::from_utf8_lossy(&buf[..total]);
        assert!(response.contains("+OK"));
        assert!(response.contains("v1"));
        assert!(response.contains("v2"));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = client.read(&mut buf).await.unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_monitor_receives_other_clients_commands() {
        let (addr, _) = create_test_server().await;

        let mut monitor = TcpStream::connect(addr).await.unwrap();
        monitor.write_all(b"*1\r\n$7\r\nMONITOR\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = monitor.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        let mut other = TcpStream::connect(addr).await.unwrap();
        other
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n")
            .await
            .unwrap();
        let _ = other.read(&mut buf).await.unwrap();

        let n = tokio::time::timeout(tokio::time::Duration::from_secs(1), monitor.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.contains("\"SET\""));
        assert!(line.contains("\"a\""));
    }
}
