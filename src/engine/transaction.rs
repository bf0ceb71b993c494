//! Optimistic Transactions
//!
//! MULTI opens a queue on the session; every following command is validated
//! and buffered instead of executed. EXEC runs the whole queue atomically:
//! it prepares the combined key set, takes the striped locks once for the
//! batch, validates the WATCH snapshots, and executes in order. A command
//! that fails mid-batch aborts the transaction and the recorded undo logs
//! roll back what already ran, in reverse order, with the locks still held.
//!
//! Concurrency control is optimistic: WATCH snapshots key versions while
//! holding nothing, and EXEC only fails the transaction if some writer
//! advanced a watched version in between. The abort signal is an empty
//! multi-bulk, not an error.

use crate::connection::Session;
use crate::engine::db::Db;
use crate::engine::registry::{command_name, validate_arity};
use crate::protocol::{CmdLine, RespValue};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

/// MULTI: opens transaction state. Nesting is refused.
pub fn start_multi(session: &Session) -> RespValue {
    if session.in_multi_state() {
        return RespValue::error("ERR MULTI calls can not be nested");
    }
    session.set_multi_state(true);
    RespValue::ok()
}

/// DISCARD: drops the queue and watch map and leaves MULTI.
pub fn discard_multi(session: &Session) -> RespValue {
    if !session.in_multi_state() {
        return RespValue::error("ERR DISCARD without MULTI");
    }
    session.clear_queued_cmds();
    session.set_multi_state(false);
    RespValue::ok()
}

/// WATCH: snapshots the current version of each key into the session.
/// Refused inside MULTI, where a fresh snapshot could never be validated.
pub fn watch(db: &Db, session: &Session, keys: &[Bytes]) -> RespValue {
    if session.in_multi_state() {
        return RespValue::error("ERR WATCH inside MULTI is not allowed");
    }
    for key in keys {
        session.watch_key(key.clone(), db.version(key));
    }
    RespValue::ok()
}

/// Buffers one command during MULTI. Unknown commands, commands without a
/// `prepare` hook, and arity mismatches are refused up front so EXEC never
/// sees them.
pub fn enqueue(db: &Db, session: &Session, cmd_line: &[Bytes]) -> RespValue {
    let name = command_name(cmd_line);
    let Some(cmd) = db.command_table().lookup(&name) else {
        return RespValue::unknown_command(&name);
    };
    if cmd.prepare.is_none() {
        return RespValue::error(format!("ERR command '{name}' cannot be used in MULTI"));
    }
    if !validate_arity(cmd.arity, cmd_line.len()) {
        return RespValue::arity_error(&name);
    }
    session.enqueue_cmd(cmd_line.to_vec());
    RespValue::queued()
}

/// EXEC: closes the MULTI window and runs the queue atomically.
pub fn exec_multi(db: &Db, session: &Session) -> RespValue {
    if !session.in_multi_state() {
        return RespValue::error("ERR EXEC without MULTI");
    }
    let cmd_lines = session.queued_cmds();
    let watching = session.watching();
    session.set_multi_state(false);
    db.exec_transaction(&watching, &cmd_lines)
}

/// True when any watched key's current version differs from its snapshot.
fn watching_changed(db: &Db, watching: &HashMap<Bytes, u32>) -> bool {
    watching
        .iter()
        .any(|(key, snapshot)| db.version(key) != *snapshot)
}

/// The atomic batch executor behind EXEC. Locks are held from before watch
/// validation until after commit or rollback.
pub(crate) fn exec_batch(
    db: &Db,
    watching: &HashMap<Bytes, u32>,
    cmd_lines: &[CmdLine],
) -> RespValue {
    // union of every queued command's key sets
    let mut write_keys: Vec<Bytes> = Vec::new();
    let mut read_keys: Vec<Bytes> = Vec::new();
    for cmd_line in cmd_lines {
        let name = command_name(cmd_line);
        if let Some(prepare) = db.command_table().lookup(&name).and_then(|c| c.prepare) {
            let (write, read) = prepare(&cmd_line[1..]);
            write_keys.extend(write);
            read_keys.extend(read);
        }
    }
    // watched keys join the read set so their versions hold still while
    // we validate them
    read_keys.extend(watching.keys().cloned());

    let locker = db.locker();
    let _guard = locker.lock_multi(&write_keys, &read_keys);

    if watching_changed(db, watching) {
        debug!("transaction aborted, watched key modified");
        return RespValue::empty_array();
    }

    let mut results = Vec::with_capacity(cmd_lines.len());
    let mut undo_logs: Vec<Vec<CmdLine>> = Vec::with_capacity(cmd_lines.len());
    let mut aborted = false;

    for cmd_line in cmd_lines {
        // snapshot the rollback before the command can change anything
        undo_logs.push(db.undo_logs(cmd_line));
        let result = db.exec_with_lock(cmd_line);
        if result.is_error() {
            aborted = true;
            // the failed command wrote nothing; don't roll it back
            undo_logs.pop();
            break;
        }
        results.push(result);
    }

    if !aborted {
        db.add_version(&write_keys);
        return RespValue::array(results);
    }

    // roll back what already executed, newest first, locks still held
    for undo_cmd_lines in undo_logs.iter().rev() {
        for cmd_line in undo_cmd_lines {
            db.exec_with_lock(cmd_line);
        }
    }
    RespValue::error("ERR transaction rolled back because of previous errors")
}
