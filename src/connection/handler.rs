//! Connection Loop
//!
//! One task per accepted socket: read bytes, feed the parser, execute each
//! complete command against the engine, write the reply through the
//! session. TCP is a stream, so the buffer may hold half a command or
//! several at once; the parser consumes exactly what it recognizes and the
//! rest waits for the next read.
//!
//! Error policy follows the protocol contract: a malformed frame earns the
//! client an error reply and the stream stays open (the handler resyncs at
//! the next line boundary); an I/O error or EOF tears the session down.

use crate::connection::session::Session;
use crate::engine::Engine;
use crate::protocol::{RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, trace, warn};

/// Reject clients that buffer more than this without completing a command.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
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

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Why a connection loop ended.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("input buffer limit exceeded")]
    BufferFull,

    #[error("server shutting down")]
    ServerClosed,
}

/// Drives one client connection to completion.
pub struct ConnectionHandler {
    reader: OwnedReadHalf,
    addr: SocketAddr,
    session: Arc<Session>,
    engine: Arc<Engine>,
    buffer: BytesMut,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        addr: SocketAddr,
        session: Arc<Session>,
        engine: Arc<Engine>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        Self {
            reader,
            addr,
            session,
            engine,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            stats,
        }
    }

    /// Runs the read-parse-execute-reply loop until the peer goes away, a
    /// fatal error occurs, or the server closes the session.
    pub async fn run(mut self) {
        info!(client = %self.addr, "client connected");
        let result = self.main_loop().await;
        match &result {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::ServerClosed) => {
                debug!(client = %self.addr, "session closed by server")
            }
            Err(ConnectionError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection error"),
        }
        self.session.close().await;
        self.stats.connection_closed();
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.drain_buffer().await?;

            // need more bytes for a complete frame
            let read = tokio::select! {
                read = self.reader.read_buf(&mut self.buffer) => read?,
                _ = self.session.closed() => return Err(ConnectionError::ServerClosed),
            };
            if read == 0 {
                if self.buffer.is_empty() {
                    return Err(ConnectionError::ClientDisconnected);
                }
                return Err(ConnectionError::UnexpectedEof);
            }
            self.stats.bytes_read.fetch_add(read as u64, Ordering::Relaxed);

            if self.buffer.len() > MAX_BUFFER_SIZE {
                return Err(ConnectionError::BufferFull);
            }
        }
    }

    /// Parses and executes every complete command currently buffered.
    async fn drain_buffer(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.parser.parse(&self.buffer) {
                Ok(Some((value, consumed))) => {
                    self.buffer.advance(consumed);
                    trace!(client = %self.addr, consumed, "parsed request");
                    let reply = self.execute(value);
                    self.write_reply(&reply).await?;
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    // protocol error: reply, resync, keep the stream alive
                    warn!(client = %self.addr, error = %e, "protocol error");
                    let reply = RespValue::error(format!("ERR Protocol error: {e}"));
                    self.write_reply(&reply).await?;
                    self.resync();
                }
            }
        }
    }

    fn execute(&mut self, request: RespValue) -> RespValue {
        let Some(cmd_line) = request.into_cmd_line() else {
            return RespValue::error("ERR request must be a multi bulk of bulk strings");
        };
        self.stats.commands_processed.fetch_add(1, Ordering::Relaxed);
        self.engine.exec(&self.session, &cmd_line)
    }

    async fn write_reply(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.session.write(&bytes).await?;
        self.stats
            .bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Discards buffered input through the next CRLF so parsing resumes at
    /// a line boundary; with no CRLF in sight the whole buffer goes.
    fn resync(&mut self) {
        match self.buffer.windows(2).position(|w| w == b"\r\n") {
            Some(pos) => self.buffer.advance(pos + 2),
            None => self.buffer.clear(),
        }
    }
}
