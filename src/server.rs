//! TCP Server
//!
//! Binds the listener, accepts connections, and hands each one to its own
//! connection task. Shutdown is signal driven: SIGHUP, SIGQUIT, SIGTERM and
//! SIGINT all stop the accept loop, close the listener, close every active
//! session (each drains its in-flight writes first), and wait for the
//! connection tasks to finish.

use crate::config::ServerConfig;
use crate::connection::{ConnectionHandler, ConnectionStats, Session};
use crate::engine::Engine;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Sessions currently being served, keyed by an accept counter.
type SessionRegistry = Arc<Mutex<HashMap<u64, Arc<Session>>>>;

/// Binds the configured address and serves until a shutdown signal.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.address()).await?;
    info!(address = %config.address(), "bound, start listening");
    let engine = Engine::new(&config);
    serve(listener, engine, &config, shutdown_signal()).await;
    Ok(())
}

/// Accept loop with an externally supplied shutdown future; the binary
/// passes the signal listener, tests pass whatever they like.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    config: &ServerConfig,
    shutdown: impl Future<Output = ()>,
) {
    let stats = Arc::new(ConnectionStats::new());
    let sessions: SessionRegistry = Arc::new(Mutex::new(HashMap::new()));
    let mut tasks = JoinSet::new();
    let mut next_id: u64 = 0;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                };
                if config.max_clients > 0 && stats.active() >= config.max_clients as u64 {
                    warn!(client = %peer, "connection limit reached, dropping");
                    drop(stream);
                    continue;
                }

                let (reader, writer) = stream.into_split();
                let session = Arc::new(Session::new(writer));
                let id = next_id;
                next_id += 1;
                sessions.lock().unwrap().insert(id, Arc::clone(&session));

                let handler = ConnectionHandler::new(
                    reader,
                    peer,
                    Arc::clone(&session),
                    Arc::clone(&engine),
                    Arc::clone(&stats),
                );
                let registry = Arc::clone(&sessions);
                tasks.spawn(async move {
                    handler.run().await;
                    registry.lock().unwrap().remove(&id);
                });
            }
        }
    }

    info!("shutting down");
    drop(listener);

    // close every active session, then wait for their tasks to drain
    let active: Vec<Arc<Session>> = sessions.lock().unwrap().values().cloned().collect();
    for session in active {
        session.close().await;
    }
    while tasks.join_next().await.is_some() {}

    engine.close();
    info!("shutdown complete");
}

/// Resolves when any of the shutdown signals arrives.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hangup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    let mut quit = signal(SignalKind::quit()).expect("install SIGQUIT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = hangup.recv() => {}
        _ = quit.recv() => {}
        _ = terminate.recv() => {}
        _ = interrupt.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("install Ctrl+C handler");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn spawn_server(config: ServerConfig) -> (SocketAddr, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = Engine::new(&config);
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(async move {
            serve(listener, engine, &config, async {
                let _ = stop_rx.await;
            })
            .await;
        });
        (addr, stop_tx)
    }

    #[tokio::test]
    async fn serves_and_shuts_down_gracefully() {
        let (addr, stop) = spawn_server(ServerConfig::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");

        stop.send(()).unwrap();

        // the server closes the established connection on its way down
        let mut rest = Vec::new();
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            client.read_to_end(&mut rest),
        )
        .await
        .expect("server did not close the connection");
    }

    #[tokio::test]
    async fn connection_limit_is_enforced() {
        let (addr, _stop) = spawn_server(ServerConfig {
            max_clients: 1,
            ..ServerConfig::default()
        })
        .await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = first.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");

        // over the limit: accepted then immediately dropped
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut rest = Vec::new();
        let closed = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            second.read_to_end(&mut rest),
        )
        .await;
        assert!(closed.is_ok(), "second connection should have been closed");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn auth_required_end_to_end() {
        let (addr, _stop) = spawn_server(ServerConfig {
            require_pass: "sesame".to_string(),
            ..ServerConfig::default()
        })
        .await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 64];

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"-NOAUTH"));

        client
            .write_all(b"*2\r\n$4\r\nAUTH\r\n$6\r\nsesame\r\n")
            .await
            .unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }
}
