//! Client Session State
//!
//! Everything the server remembers about one TCP client between commands:
//! the password it presented, its channel subscriptions, the MULTI state
//! with its queued commands and watched-key version snapshots, and the
//! database index it selected.
//!
//! Outgoing bytes are serialized through a mutex so replies never
//! interleave, and a wait group tracks in-flight writes so `close()` can
//! drain them (bounded at ten seconds) before shutting the socket down.
//! State mutation happens only on the owning connection task; the mutexes
//! exist for the shutdown path, which closes sessions from the server task.

use crate::protocol::CmdLine;
use crate::sync::Wait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};

/// How long `close()` waits for in-flight writes before giving up.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct SessionState {
    /// Password presented by AUTH; compared against `requirepass` on every
    /// command, so a wrong AUTH is just a not-yet-authenticated session.
    password: Option<String>,
    /// Subscribed channel names.
    subs: HashSet<Bytes>,
    /// True between MULTI and EXEC/DISCARD.
    in_multi: bool,
    /// Commands buffered by MULTI.
    queue: Vec<CmdLine>,
    /// Watched key -> version snapshot taken by WATCH.
    watching: HashMap<Bytes, u32>,
    /// SELECTed database index.
    db_index: usize,
}

/// Per-connection session. Shared between the connection task and the
/// server's shutdown path via `Arc`.
#[derive(Debug)]
pub struct Session {
    writer: Option<Mutex<OwnedWriteHalf>>,
    pending_writes: Wait,
    state: StdMutex<SessionState>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Session {
    /// Session bound to the write half of an accepted socket.
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Some(Mutex::new(writer)),
            pending_writes: Wait::new(),
            state: StdMutex::new(SessionState::default()),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    /// Session with no socket attached; replies are discarded. Used by
    /// engine-level tests that exercise command dispatch directly.
    pub fn detached() -> Self {
        Self {
            writer: None,
            pending_writes: Wait::new(),
            state: StdMutex::new(SessionState::default()),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    /// Writes protocol bytes to the peer. All writes go through one mutex
    /// and are counted so a concurrent `close()` can drain them.
    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let mut writer = writer.lock().await;
        self.pending_writes.add(1);
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;
        self.pending_writes.done();
        result
    }

    /// Drains in-flight writes (up to ten seconds), then shuts the socket
    /// down and wakes the connection task. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending_writes.wait_timeout(CLOSE_DRAIN_TIMEOUT).await;
        if let Some(writer) = &self.writer {
            let _ = writer.lock().await.shutdown().await;
        }
        self.close_signal.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves when `close()` has run; the connection task selects on this
    /// against its socket reads.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }

    /* ---------- authentication ---------- */

    pub fn set_password(&self, password: impl Into<String>) {
        self.state.lock().unwrap().password = Some(password.into());
    }

    pub fn password(&self) -> Option<String> {
        self.state.lock().unwrap().password.clone()
    }

    /* ---------- pub/sub subscription state ---------- */

    /// Adds a channel subscription; already-subscribed channels are a no-op.
    pub fn subscribe(&self, channel: Bytes) {
        self.state.lock().unwrap().subs.insert(channel);
    }

    /// Removes a channel subscription; unknown channels are a no-op.
    pub fn unsubscribe(&self, channel: &[u8]) {
        self.state.lock().unwrap().subs.remove(channel);
    }

    pub fn subs_count(&self) -> usize {
        self.state.lock().unwrap().subs.len()
    }

    pub fn channels(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().subs.iter().cloned().collect()
    }

    /* ---------- transaction state ---------- */

    pub fn in_multi_state(&self) -> bool {
        self.state.lock().unwrap().in_multi
    }

    /// Enters or leaves MULTI. Leaving empties the queue and the watch map.
    pub fn set_multi_state(&self, in_multi: bool) {
        let mut state = self.state.lock().unwrap();
        if !in_multi {
            state.queue.clear();
            state.watching.clear();
        }
        state.in_multi = in_multi;
    }

    pub fn enqueue_cmd(&self, cmd_line: CmdLine) {
        self.state.lock().unwrap().queue.push(cmd_line);
    }

    pub fn queued_cmds(&self) -> Vec<CmdLine> {
        self.state.lock().unwrap().queue.clone()
    }

    pub fn clear_queued_cmds(&self) {
        self.state.lock().unwrap().queue.clear();
    }

    /// Records a watched key's version snapshot.
    pub fn watch_key(&self, key: Bytes, version: u32) {
        self.state.lock().unwrap().watching.insert(key, version);
    }

    pub fn watching(&self) -> HashMap<Bytes, u32> {
        self.state.lock().unwrap().watching.clone()
    }

    /* ---------- database selection ---------- */

    pub fn db_index(&self) -> usize {
        self.state.lock().unwrap().db_index
    }

    pub fn select_db(&self, index: usize) {
        self.state.lock().unwrap().db_index = index;
    }
}
