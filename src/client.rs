//! Async Client
//!
//! A pipelined client for the wire protocol. Requests go through a writer
//! task, their reply slots queue up in arrival order, and a reader task
//! matches each parsed reply to the oldest slot. Callers wait at most three
//! seconds per request; on timeout they get a synthetic `server time out`
//! error while the request stays in flight and its eventual reply is
//! discarded. A background heartbeat PINGs every ten seconds to keep the
//! connection honest.

use crate::protocol::{CmdLine, RespParser, RespValue};
use crate::sync::Wait;
use bytes::{Buf, BytesMut};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// How long a caller waits for a reply.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Interval between keepalive PINGs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Outstanding-request channel depth.
const PIPELINE_DEPTH: usize = 256;

struct Request {
    args: CmdLine,
    reply_tx: oneshot::Sender<RespValue>,
}

/// Handle to one client connection.
pub struct Client {
    requests: mpsc::Sender<Request>,
    working: Arc<Wait>,
}

impl Client {
    /// Connects and spawns the writer, reader and heartbeat tasks.
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();

        let (request_tx, request_rx) = mpsc::channel(PIPELINE_DEPTH);
        let (slot_tx, slot_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, request_rx, slot_tx));
        tokio::spawn(read_loop(reader, slot_rx));
        tokio::spawn(heartbeat_loop(request_tx.downgrade()));

        Ok(Self {
            requests: request_tx,
            working: Arc::new(Wait::new()),
        })
    }

    /// Sends one command and waits for its reply. Errors come back as
    /// error replies, never as `Err`.
    pub async fn send(&self, args: CmdLine) -> RespValue {
        self.working.add(1);
        let reply = self.send_inner(args).await;
        self.working.done();
        reply
    }

    async fn send_inner(&self, args: CmdLine) -> RespValue {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .requests
            .send(Request { args, reply_tx })
            .await
            .is_err()
        {
            return RespValue::error("ERR client connection closed");
        }
        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => RespValue::error("ERR client connection closed"),
            // dropping reply_rx discards the eventual late reply
            Err(_) => RespValue::error("ERR server time out"),
        }
    }

    /// Finishes outstanding requests (bounded by the request timeout), then
    /// tears the connection down.
    pub async fn close(self) {
        self.working.wait_timeout(REQUEST_TIMEOUT).await;
        // dropping the sender stops the writer, which shuts the socket down
    }
}

/// Serializes requests onto the socket and queues their reply slots.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut requests: mpsc::Receiver<Request>,
    slots: mpsc::UnboundedSender<oneshot::Sender<RespValue>>,
) {
    while let Some(request) = requests.recv().await {
        let bytes = RespValue::from_cmd_line(&request.args).serialize();
        if let Err(e) = writer.write_all(&bytes).await {
            let _ = request
                .reply_tx
                .send(RespValue::error(format!("ERR write failed: {e}")));
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
        // reply slots queue in send order; replies arrive in the same order
        if slots.send(request.reply_tx).is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
    debug!("client writer stopped");
}

/// Parses replies off the socket and resolves reply slots in order.
async fn read_loop(
    mut reader: OwnedReadHalf,
    mut slots: mpsc::UnboundedReceiver<oneshot::Sender<RespValue>>,
) {
    let mut parser = RespParser::new();
    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        loop {
            match parser.parse(&buffer) {
                Ok(Some((reply, consumed))) => {
                    buffer.advance(consumed);
                    let Some(slot) = slots.recv().await else {
                        return;
                    };
                    // a timed-out caller dropped its receiver; that's fine
                    let _ = slot.send(reply);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "client protocol error, closing");
                    return;
                }
            }
        }
    }
    debug!("client reader stopped");
}

/// Periodic PING whose reply is deliberately discarded.
async fn heartbeat_loop(requests: mpsc::WeakSender<Request>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.tick().await; // the first tick is immediate; skip it
    loop {
        ticker.tick().await;
        let Some(requests) = requests.upgrade() else {
            return;
        };
        let (reply_tx, _discarded) = oneshot::channel();
        if requests
            .send(Request {
                args: vec![bytes::Bytes::from_static(b"PING")],
                reply_tx,
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::engine::Engine;
    use crate::server;
    use bytes::Bytes;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot as osh;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    async fn spawn_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig::default();
        let engine = Engine::new(&config);
        let (_stop_tx, stop_rx) = osh::channel::<()>();
        tokio::spawn(async move {
            server::serve(listener, engine, &config, async {
                let _ = stop_rx.await;
            })
            .await;
        });
        // the stop channel leaks with the task; fine for a test process
        std::mem::forget(_stop_tx);
        addr
    }

    #[tokio::test]
    async fn set_get_through_client() {
        let addr = spawn_server().await;
        let client = Client::connect(addr).await.unwrap();

        let reply = client.send(vec![b("SET"), b("k"), b("v")]).await;
        assert_eq!(reply, RespValue::ok());

        let reply = client.send(vec![b("GET"), b("k")]).await;
        assert_eq!(reply, RespValue::bulk(b("v")));

        let reply = client.send(vec![b("GET"), b("missing")]).await;
        assert_eq!(reply, RespValue::Null);

        client.close().await;
    }

    #[tokio::test]
    async fn pipelined_requests_keep_order() {
        let addr = spawn_server().await;
        let client = Arc::new(Client::connect(addr).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                let key = format!("k{i}");
                let value = format!("v{i}");
                let reply = client
                    .send(vec![b("SET"), b(&key), b(&value)])
                    .await;
                assert_eq!(reply, RespValue::ok());
                let reply = client.send(vec![b("GET"), b(&key)]).await;
                assert_eq!(reply, RespValue::bulk(b(&value)));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn error_replies_come_back_as_values() {
        let addr = spawn_server().await;
        let client = Client::connect(addr).await.unwrap();
        let reply = client.send(vec![b("NOSUCH")]).await;
        assert!(reply.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        // a listener that accepts and never replies
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // hold the socket open without answering
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let client = Client::connect(addr).await.unwrap();
        let reply = client.send(vec![b("PING")]).await;
        assert_eq!(reply, RespValue::error("ERR server time out"));
    }
}
