//! String Commands
//!
//! SET and friends. Strings are the only entity the counter commands
//! (INCR/DECR) operate on; they parse the stored bytes as a decimal i64 and
//! keep any TTL the key already had.

use crate::commands::{
    millis_from_now, not_an_integer, parse_int, read_all_keys, read_first_key, rollback_first_key,
    rollback_keys, syntax_error, wrong_type, write_first_key,
};
use crate::engine::db::Db;
use crate::engine::entity::DataEntity;
use crate::engine::registry::CommandTable;
use crate::protocol::{CmdLine, RespValue};
use bytes::Bytes;

pub fn register(table: &mut CommandTable) {
    table.register("set", set, Some(write_first_key), Some(rollback_first_key), -3);
    table.register("get", get, Some(read_first_key), None, 2);
    table.register("getset", getset, Some(write_first_key), Some(rollback_first_key), 3);
    table.register("setnx", setnx, Some(write_first_key), Some(rollback_first_key), 3);
    table.register("setex", setex, Some(write_first_key), Some(rollback_first_key), 4);
    table.register("psetex", psetex, Some(write_first_key), Some(rollback_first_key), 4);
    table.register("mset", mset, Some(mset_prepare), Some(mset_undo), -3);
    table.register("mget", mget, Some(read_all_keys), None, -2);
    table.register("incr", incr, Some(write_first_key), Some(rollback_first_key), 2);
    table.register("incrby", incrby, Some(write_first_key), Some(rollback_first_key), 3);
    table.register("decr", decr, Some(write_first_key), Some(rollback_first_key), 2);
    table.register("decrby", decrby, Some(write_first_key), Some(rollback_first_key), 3);
    table.register("append", append, Some(write_first_key), Some(rollback_first_key), 3);
    table.register("strlen", strlen, Some(read_first_key), None, 2);
}

/// Insert policy carried by SET's NX/XX options.
enum SetPolicy {
    Always,
    IfAbsent,
    IfExists,
}

/// SET key value [EX seconds | PX milliseconds] [NX | XX]
fn set(db: &Db, args: &[Bytes]) -> RespValue {
    let key = args[0].clone();
    let value = args[1].clone();

    let mut policy = SetPolicy::Always;
    let mut ttl_ms: Option<i64> = None;

    let mut i = 2;
    while i < args.len() {
        let option = String::from_utf8_lossy(&args[i]).to_ascii_uppercase();
        match option.as_str() {
            "EX" | "PX" => {
                i += 1;
                let Some(raw) = args.get(i) else {
                    return syntax_error();
                };
                let ms = match parse_int(raw) {
                    Some(n) if n > 0 => {
                        if option == "EX" {
                            n.saturating_mul(1000)
                        } else {
                            n
                        }
                    }
                    _ => return RespValue::error("ERR invalid expire time in 'set' command"),
                };
                ttl_ms = Some(ms);
            }
            "NX" => policy = SetPolicy::IfAbsent,
            "XX" => policy = SetPolicy::IfExists,
            _ => return syntax_error(),
        }
        i += 1;
    }

    let entity = DataEntity::Str(value);
    let applied = match policy {
        SetPolicy::Always => {
            db.put_entity(key.clone(), entity);
            true
        }
        SetPolicy::IfAbsent => db.put_if_absent(key.clone(), entity),
        SetPolicy::IfExists => db.put_if_exists(key.clone(), entity),
    };

    if !applied {
        return RespValue::Null;
    }
    match ttl_ms {
        Some(ms) => db.expire(&key, millis_from_now(ms)),
        None => {
            db.persist(&key);
        }
    }
    RespValue::ok()
}

/// GET key
fn get(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Str(value)) => RespValue::Bulk(value),
        Some(_) => wrong_type(),
        None => RespValue::Null,
    }
}

/// GETSET key value
fn getset(db: &Db, args: &[Bytes]) -> RespValue {
    let old = match db.get_entity(&args[0]) {
        Some(DataEntity::Str(value)) => Some(value),
        Some(_) => return wrong_type(),
        None => None,
    };
    db.put_entity(args[0].clone(), DataEntity::Str(args[1].clone()));
    db.persist(&args[0]);
    RespValue::bulk_or_null(old)
}

/// SETNX key value
fn setnx(db: &Db, args: &[Bytes]) -> RespValue {
    let inserted = db.put_if_absent(args[0].clone(), DataEntity::Str(args[1].clone()));
    RespValue::integer(inserted as i64)
}

/// SETEX key seconds value
fn setex(db: &Db, args: &[Bytes]) -> RespValue {
    set_with_ttl(db, args, 1000, "setex")
}

/// PSETEX key milliseconds value
fn psetex(db: &Db, args: &[Bytes]) -> RespValue {
    set_with_ttl(db, args, 1, "psetex")
}

fn set_with_ttl(db: &Db, args: &[Bytes], unit_ms: i64, name: &str) -> RespValue {
    let ttl = match parse_int(&args[1]) {
        Some(n) if n > 0 => n.saturating_mul(unit_ms),
        Some(_) => return RespValue::error(format!("ERR invalid expire time in '{name}' command")),
        None => return not_an_integer(),
    };
    db.put_entity(args[0].clone(), DataEntity::Str(args[2].clone()));
    db.expire(&args[0], millis_from_now(ttl));
    RespValue::ok()
}

/// MSET key value [key value ...]
fn mset(db: &Db, args: &[Bytes]) -> RespValue {
    if args.len() % 2 != 0 {
        return RespValue::arity_error("mset");
    }
    for pair in args.chunks_exact(2) {
        db.put_entity(pair[0].clone(), DataEntity::Str(pair[1].clone()));
    }
    RespValue::ok()
}

fn mset_keys(args: &[Bytes]) -> Vec<Bytes> {
    args.iter().step_by(2).cloned().collect()
}

fn mset_prepare(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (mset_keys(args), Vec::new())
}

fn mset_undo(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    rollback_keys(db, &mset_keys(args))
}

/// MGET key [key ...]
fn mget(db: &Db, args: &[Bytes]) -> RespValue {
    let values = args
        .iter()
        .map(|key| match db.get_entity(key) {
            Some(DataEntity::Str(value)) => RespValue::Bulk(value),
            _ => RespValue::Null,
        })
        .collect();
    RespValue::Array(values)
}

/// INCR key
fn incr(db: &Db, args: &[Bytes]) -> RespValue {
    incr_by(db, &args[0], 1)
}

/// INCRBY key delta
fn incrby(db: &Db, args: &[Bytes]) -> RespValue {
    match parse_int(&args[1]) {
        Some(delta) => incr_by(db, &args[0], delta),
        None => not_an_integer(),
    }
}

/// DECR key
fn decr(db: &Db, args: &[Bytes]) -> RespValue {
    incr_by(db, &args[0], -1)
}

/// DECRBY key delta
fn decrby(db: &Db, args: &[Bytes]) -> RespValue {
    match parse_int(&args[1]) {
        Some(delta) => incr_by(db, &args[0], -delta),
        None => not_an_integer(),
    }
}

fn incr_by(db: &Db, key: &Bytes, delta: i64) -> RespValue {
    let current = match db.get_entity(key) {
        Some(DataEntity::Str(value)) => match parse_int(&value) {
            Some(n) => n,
            None => return not_an_integer(),
        },
        Some(_) => return wrong_type(),
        None => 0,
    };
    let Some(next) = current.checked_add(delta) else {
        return RespValue::error("ERR increment or decrement would overflow");
    };
    // the ttl map is untouched, so an existing expiry carries over
    db.put_entity(key.clone(), DataEntity::Str(Bytes::from(next.to_string())));
    RespValue::integer(next)
}

/// APPEND key value
fn append(db: &Db, args: &[Bytes]) -> RespValue {
    let current = match db.get_entity(&args[0]) {
        Some(DataEntity::Str(value)) => value,
        Some(_) => return wrong_type(),
        None => Bytes::new(),
    };
    let mut combined = Vec::with_capacity(current.len() + args[1].len());
    combined.extend_from_slice(&current);
    combined.extend_from_slice(&args[1]);
    let new_len = combined.len();
    db.put_entity(args[0].clone(), DataEntity::Str(Bytes::from(combined)));
    RespValue::integer(new_len as i64)
}

/// STRLEN key
fn strlen(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Str(value)) => RespValue::integer(value.len() as i64),
        Some(_) => wrong_type(),
        None => RespValue::integer(0),
    }
}
