//! Key-Space Commands
//!
//! Deletion, existence, expiry control, renames and key enumeration. The
//! expiry commands all funnel into [`Db::expire`] with an absolute
//! wall-clock deadline; their undo replays the TTL state the key had
//! before the command.

use crate::commands::{
    epoch_millis, millis_from_now, not_an_integer, parse_int, read_all_keys, read_first_key,
    rollback_all_keys, undo_expire, write_all_keys, write_first_key,
};
use crate::engine::db::Db;
use crate::engine::registry::{no_prepare, CommandTable};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn register(table: &mut CommandTable) {
    table.register("del", del, Some(write_all_keys), Some(rollback_all_keys), -2);
    table.register("exists", exists, Some(read_all_keys), None, -2);
    table.register("expire", expire, Some(write_first_key), Some(undo_expire), 3);
    table.register("pexpire", pexpire, Some(write_first_key), Some(undo_expire), 3);
    table.register("expireat", expireat, Some(write_first_key), Some(undo_expire), 3);
    table.register("pexpireat", pexpireat, Some(write_first_key), Some(undo_expire), 3);
    table.register("ttl", ttl, Some(read_first_key), None, 2);
    table.register("pttl", pttl, Some(read_first_key), None, 2);
    table.register("persist", persist, Some(write_first_key), Some(undo_expire), 2);
    table.register("type", key_type, Some(read_first_key), None, 2);
    table.register("keys", keys, Some(no_prepare), None, 2);
    table.register("randomkey", randomkey, Some(no_prepare), None, 1);
    table.register("rename", rename, Some(write_all_keys), Some(rollback_all_keys), 3);
    table.register("renamenx", renamenx, Some(write_all_keys), Some(rollback_all_keys), 3);
}

/// DEL key [key ...]
fn del(db: &Db, args: &[Bytes]) -> RespValue {
    RespValue::integer(db.removes(args) as i64)
}

/// EXISTS key [key ...]
fn exists(db: &Db, args: &[Bytes]) -> RespValue {
    let count = args
        .iter()
        .filter(|key| db.get_entity(key).is_some())
        .count();
    RespValue::integer(count as i64)
}

/// EXPIRE key seconds
fn expire(db: &Db, args: &[Bytes]) -> RespValue {
    expire_in(db, args, 1000)
}

/// PEXPIRE key milliseconds
fn pexpire(db: &Db, args: &[Bytes]) -> RespValue {
    expire_in(db, args, 1)
}

fn expire_in(db: &Db, args: &[Bytes], unit_ms: i64) -> RespValue {
    let Some(delta) = parse_int(&args[1]) else {
        return not_an_integer();
    };
    expire_key_at(db, &args[0], millis_from_now(delta.saturating_mul(unit_ms)))
}

/// EXPIREAT key unix-seconds
fn expireat(db: &Db, args: &[Bytes]) -> RespValue {
    expire_at(db, args, 1000)
}

/// PEXPIREAT key unix-milliseconds
fn pexpireat(db: &Db, args: &[Bytes]) -> RespValue {
    expire_at(db, args, 1)
}

fn expire_at(db: &Db, args: &[Bytes], unit_ms: i64) -> RespValue {
    let Some(stamp) = parse_int(&args[1]) else {
        return not_an_integer();
    };
    let ms = stamp.saturating_mul(unit_ms);
    let at = if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH
    };
    expire_key_at(db, &args[0], at)
}

fn expire_key_at(db: &Db, key: &Bytes, at: SystemTime) -> RespValue {
    if db.get_entity(key).is_none() {
        return RespValue::integer(0);
    }
    db.expire(key, at);
    RespValue::integer(1)
}

/// TTL key (seconds; -1 without expiry, -2 without key)
fn ttl(db: &Db, args: &[Bytes]) -> RespValue {
    remaining(db, &args[0], 1000)
}

/// PTTL key (milliseconds)
fn pttl(db: &Db, args: &[Bytes]) -> RespValue {
    remaining(db, &args[0], 1)
}

fn remaining(db: &Db, key: &Bytes, unit_ms: i64) -> RespValue {
    if db.get_entity(key).is_none() {
        return RespValue::integer(-2);
    }
    match db.time_to_live(key) {
        Some(at) => {
            let left_ms = (epoch_millis(at) - epoch_millis(SystemTime::now())).max(0);
            RespValue::integer(left_ms / unit_ms)
        }
        None => RespValue::integer(-1),
    }
}

/// PERSIST key
fn persist(db: &Db, args: &[Bytes]) -> RespValue {
    if db.get_entity(&args[0]).is_none() {
        return RespValue::integer(0);
    }
    RespValue::integer(db.persist(&args[0]) as i64)
}

/// TYPE key
fn key_type(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(entity) => RespValue::status(entity.type_name()),
        None => RespValue::status("none"),
    }
}

/// KEYS pattern
fn keys(db: &Db, args: &[Bytes]) -> RespValue {
    let pattern = args[0].clone();
    let mut matched = Vec::new();
    db.for_each(|key, _| {
        if glob_match(&pattern, key) {
            matched.push(key.clone());
        }
        true
    });
    // filter entries whose ttl lapsed but whose sweep task hasn't fired
    let live = matched
        .into_iter()
        .filter(|key| db.get_entity(key).is_some())
        .map(RespValue::Bulk)
        .collect();
    RespValue::Array(live)
}

/// RANDOMKEY
fn randomkey(db: &Db, _args: &[Bytes]) -> RespValue {
    RespValue::bulk_or_null(db.random_keys(1).into_iter().next())
}

/// RENAME key newkey
fn rename(db: &Db, args: &[Bytes]) -> RespValue {
    match rename_inner(db, args) {
        Ok(_) => RespValue::ok(),
        Err(reply) => reply,
    }
}

/// RENAMENX key newkey
fn renamenx(db: &Db, args: &[Bytes]) -> RespValue {
    if db.get_entity(&args[1]).is_some() {
        return RespValue::integer(0);
    }
    match rename_inner(db, args) {
        Ok(_) => RespValue::integer(1),
        Err(reply) => reply,
    }
}

fn rename_inner(db: &Db, args: &[Bytes]) -> Result<(), RespValue> {
    let Some(entity) = db.get_entity(&args[0]) else {
        return Err(RespValue::error("ERR no such key"));
    };
    let carried_ttl = db.time_to_live(&args[0]);
    db.remove(&args[0]);
    db.put_entity(args[1].clone(), entity);
    match carried_ttl {
        Some(at) => db.expire(&args[1], at),
        None => {
            db.persist(&args[1]);
        }
    }
    Ok(())
}

/// Glob matching over raw bytes: `*`, `?`, `[a-z]`, `[^x]`, and `\`-escape.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }
    match pattern[0] {
        b'*' => (0..=text.len()).any(|i| glob_match(&pattern[1..], &text[i..])),
        b'?' => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        b'[' => {
            if text.is_empty() {
                return false;
            }
            let mut i = 1;
            let negate = pattern.get(1) == Some(&b'^');
            if negate {
                i += 1;
            }
            let mut matched = false;
            while i < pattern.len() && pattern[i] != b']' {
                if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
                    if text[0] >= pattern[i] && text[0] <= pattern[i + 2] {
                        matched = true;
                    }
                    i += 3;
                } else {
                    if pattern[i] == text[0] {
                        matched = true;
                    }
                    i += 1;
                }
            }
            if i >= pattern.len() {
                return false; // unterminated class
            }
            if negate {
                matched = !matched;
            }
            matched && glob_match(&pattern[i + 1..], &text[1..])
        }
        b'\\' => {
            pattern.len() > 1
                && !text.is_empty()
                && pattern[1] == text[0]
                && glob_match(&pattern[2..], &text[1..])
        }
        c => !text.is_empty() && c == text[0] && glob_match(&pattern[1..], &text[1..]),
    }
}
