//! List Commands
//!
//! Lists are deques, giving O(1) pushes and pops at both ends. A list that
//! becomes empty is removed, so an empty list and a missing key are
//! indistinguishable, matching the convention clients expect.

use crate::commands::{
    parse_int, read_first_key, rollback_first_key, wrong_type, write_first_key,
};
use crate::engine::db::Db;
use crate::engine::entity::DataEntity;
use crate::engine::registry::CommandTable;
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::VecDeque;

pub fn register(table: &mut CommandTable) {
    table.register("lpush", lpush, Some(write_first_key), Some(rollback_first_key), -3);
    table.register("rpush", rpush, Some(write_first_key), Some(rollback_first_key), -3);
    table.register("lpop", lpop, Some(write_first_key), Some(rollback_first_key), 2);
    table.register("rpop", rpop, Some(write_first_key), Some(rollback_first_key), 2);
    table.register("llen", llen, Some(read_first_key), None, 2);
    table.register("lindex", lindex, Some(read_first_key), None, 3);
    table.register("lrange", lrange, Some(read_first_key), None, 4);
}

/// LPUSH key value [value ...]
fn lpush(db: &Db, args: &[Bytes]) -> RespValue {
    push(db, args, true)
}

/// RPUSH key value [value ...]
fn rpush(db: &Db, args: &[Bytes]) -> RespValue {
    push(db, args, false)
}

fn push(db: &Db, args: &[Bytes], front: bool) -> RespValue {
    let key = &args[0];
    let values = &args[1..];

    // in-place when the list exists; a missing key gets a fresh deque below
    let result = db.update_entity(key, |slot| match slot {
        Some(DataEntity::List(list)) => Ok(Some(push_all(list, values, front))),
        Some(_) => Err(()),
        None => Ok(None),
    });

    match result {
        Err(()) => wrong_type(),
        Ok(Some(len)) => RespValue::integer(len as i64),
        Ok(None) => {
            let mut list = VecDeque::with_capacity(values.len());
            let len = push_all(&mut list, values, front);
            db.put_entity(key.clone(), DataEntity::List(list));
            RespValue::integer(len as i64)
        }
    }
}

fn push_all(list: &mut VecDeque<Bytes>, values: &[Bytes], front: bool) -> usize {
    for value in values {
        if front {
            list.push_front(value.clone());
        } else {
            list.push_back(value.clone());
        }
    }
    list.len()
}

/// LPOP key
fn lpop(db: &Db, args: &[Bytes]) -> RespValue {
    pop(db, &args[0], true)
}

/// RPOP key
fn rpop(db: &Db, args: &[Bytes]) -> RespValue {
    pop(db, &args[0], false)
}

fn pop(db: &Db, key: &Bytes, front: bool) -> RespValue {
    if db.get_entity(key).is_none() {
        return RespValue::Null;
    }
    let result = db.update_entity(key, |slot| match slot {
        Some(DataEntity::List(list)) => {
            let popped = if front {
                list.pop_front()
            } else {
                list.pop_back()
            };
            Ok((popped, list.is_empty()))
        }
        _ => Err(()),
    });
    match result {
        Err(()) => wrong_type(),
        Ok((popped, emptied)) => {
            if emptied {
                db.remove(key);
            }
            RespValue::bulk_or_null(popped)
        }
    }
}

/// LLEN key
fn llen(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::List(list)) => RespValue::integer(list.len() as i64),
        Some(_) => wrong_type(),
        None => RespValue::integer(0),
    }
}

/// LINDEX key index (negative counts from the tail)
fn lindex(db: &Db, args: &[Bytes]) -> RespValue {
    let Some(index) = parse_int(&args[1]) else {
        return crate::commands::not_an_integer();
    };
    match db.get_entity(&args[0]) {
        Some(DataEntity::List(list)) => {
            let len = list.len() as i64;
            let at = if index < 0 { len + index } else { index };
            if at < 0 || at >= len {
                return RespValue::Null;
            }
            RespValue::bulk_or_null(list.get(at as usize).cloned())
        }
        Some(_) => wrong_type(),
        None => RespValue::Null,
    }
}

/// LRANGE key start stop (inclusive, negatives count from the tail)
fn lrange(db: &Db, args: &[Bytes]) -> RespValue {
    let (Some(start), Some(stop)) = (parse_int(&args[1]), parse_int(&args[2])) else {
        return crate::commands::not_an_integer();
    };
    match db.get_entity(&args[0]) {
        Some(DataEntity::List(list)) => {
            let len = list.len() as i64;
            let mut from = if start < 0 { len + start } else { start };
            let mut to = if stop < 0 { len + stop } else { stop };
            from = from.max(0);
            to = to.min(len - 1);
            if from > to || from >= len {
                return RespValue::empty_array();
            }
            let values = list
                .iter()
                .skip(from as usize)
                .take((to - from + 1) as usize)
                .cloned()
                .map(RespValue::Bulk)
                .collect();
            RespValue::Array(values)
        }
        Some(_) => wrong_type(),
        None => RespValue::empty_array(),
    }
}
