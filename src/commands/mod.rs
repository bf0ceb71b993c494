//! Command Implementations
//!
//! Concrete executors for the commands the server ships, grouped by the
//! kind of value they operate on. Every command registers three things
//! besides its executor: an arity, a `prepare` hook naming the keys it will
//! touch (locks are taken from that set before the executor runs), and an
//! `undo` hook for write commands so EXEC can roll a failed transaction
//! back.
//!
//! Undo logs are whole-entity snapshots: for each key a command writes, the
//! undo emits `DEL` plus the command line that rebuilds the current entity
//! (`SET` / `RPUSH` / `HSET` / `SADD`) and a `PEXPIREAT` when a TTL is set.
//! Applied in reverse order they restore the pre-command state exactly.

pub mod hashes;
pub mod keys;
pub mod lists;
pub mod server;
pub mod sets;
pub mod strings;

use crate::engine::db::Db;
use crate::engine::entity::DataEntity;
use crate::engine::registry::CommandTable;
use crate::protocol::{CmdLine, RespValue};
use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Registers every command module into the table.
pub fn register_all(table: &mut CommandTable) {
    strings::register(table);
    keys::register(table);
    lists::register(table);
    hashes::register(table);
    sets::register(table);
    server::register(table);
}

/* ---------- argument helpers ---------- */

/// Parses a decimal integer argument.
pub(crate) fn parse_int(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

pub(crate) fn wrong_type() -> RespValue {
    RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

pub(crate) fn syntax_error() -> RespValue {
    RespValue::error("ERR syntax error")
}

pub(crate) fn not_an_integer() -> RespValue {
    RespValue::error("ERR value is not an integer or out of range")
}

/* ---------- prepare helpers ---------- */

pub(crate) fn write_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone()], Vec::new())
}

pub(crate) fn read_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), vec![args[0].clone()])
}

pub(crate) fn write_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.to_vec(), Vec::new())
}

pub(crate) fn read_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.to_vec())
}

/* ---------- time helpers ---------- */

/// Milliseconds since the Unix epoch for a wall-clock instant.
pub(crate) fn epoch_millis(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Wall-clock instant `delta_ms` milliseconds from now; negative deltas
/// land in the past, which expires the key on its next touch.
pub(crate) fn millis_from_now(delta_ms: i64) -> SystemTime {
    let now = SystemTime::now();
    if delta_ms >= 0 {
        now + Duration::from_millis(delta_ms as u64)
    } else {
        now - Duration::from_millis(delta_ms.unsigned_abs())
    }
}

/* ---------- undo helpers ---------- */

/// Undo for commands whose only write key is their first argument.
pub(crate) fn rollback_first_key(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    rollback_keys(db, std::slice::from_ref(&args[0]))
}

/// Undo for commands whose arguments are all write keys.
pub(crate) fn rollback_all_keys(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    rollback_keys(db, args)
}

/// Snapshot-undo for a set of keys: absent keys roll back to a `DEL`,
/// present ones to delete-and-rebuild plus their TTL.
pub(crate) fn rollback_keys(db: &Db, keys: &[Bytes]) -> Vec<CmdLine> {
    let mut cmd_lines = Vec::new();
    for key in keys {
        match db.get_entity(key) {
            None => cmd_lines.push(vec![Bytes::from_static(b"DEL"), key.clone()]),
            Some(entity) => {
                cmd_lines.push(vec![Bytes::from_static(b"DEL"), key.clone()]);
                cmd_lines.push(rebuild_cmd(key, &entity));
                if let Some(at) = db.time_to_live(key) {
                    cmd_lines.push(vec![
                        Bytes::from_static(b"PEXPIREAT"),
                        key.clone(),
                        Bytes::from(epoch_millis(at).to_string()),
                    ]);
                }
            }
        }
    }
    cmd_lines
}

/// The command line that recreates an entity from scratch.
fn rebuild_cmd(key: &Bytes, entity: &DataEntity) -> CmdLine {
    match entity {
        DataEntity::Str(value) => {
            vec![Bytes::from_static(b"SET"), key.clone(), value.clone()]
        }
        DataEntity::List(elements) => {
            let mut cmd = vec![Bytes::from_static(b"RPUSH"), key.clone()];
            cmd.extend(elements.iter().cloned());
            cmd
        }
        DataEntity::Hash(fields) => {
            let mut cmd = vec![Bytes::from_static(b"HSET"), key.clone()];
            for (field, value) in fields {
                cmd.push(field.clone());
                cmd.push(value.clone());
            }
            cmd
        }
        DataEntity::Set(members) => {
            let mut cmd = vec![Bytes::from_static(b"SADD"), key.clone()];
            cmd.extend(members.iter().cloned());
            cmd
        }
    }
}

/// Undo for the expiry family: re-apply the TTL state the key has now.
pub(crate) fn undo_expire(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = &args[0];
    if db.get_entity(key).is_none() {
        return Vec::new();
    }
    match db.time_to_live(key) {
        Some(at) => vec![vec![
            Bytes::from_static(b"PEXPIREAT"),
            key.clone(),
            Bytes::from(epoch_millis(at).to_string()),
        ]],
        None => vec![vec![Bytes::from_static(b"PERSIST"), key.clone()]],
    }
}
