//! Hash Commands
//!
//! Field/value maps under a single key. As with lists, a hash that loses
//! its last field is removed from the keyspace.

use crate::commands::{read_first_key, rollback_first_key, wrong_type, write_first_key};
use crate::engine::db::Db;
use crate::engine::entity::DataEntity;
use crate::engine::registry::CommandTable;
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;

pub fn register(table: &mut CommandTable) {
    table.register("hset", hset, Some(write_first_key), Some(rollback_first_key), -4);
    table.register("hget", hget, Some(read_first_key), None, 3);
    table.register("hdel", hdel, Some(write_first_key), Some(rollback_first_key), -3);
    table.register("hexists", hexists, Some(read_first_key), None, 3);
    table.register("hlen", hlen, Some(read_first_key), None, 2);
    table.register("hgetall", hgetall, Some(read_first_key), None, 2);
}

/// HSET key field value [field value ...]
fn hset(db: &Db, args: &[Bytes]) -> RespValue {
    let key = &args[0];
    let pairs = &args[1..];
    if pairs.len() % 2 != 0 {
        return RespValue::arity_error("hset");
    }

    let result = db.update_entity(key, |slot| match slot {
        Some(DataEntity::Hash(fields)) => Ok(Some(insert_pairs(fields, pairs))),
        Some(_) => Err(()),
        None => Ok(None),
    });

    match result {
        Err(()) => wrong_type(),
        Ok(Some(added)) => RespValue::integer(added as i64),
        Ok(None) => {
            let mut fields = HashMap::with_capacity(pairs.len() / 2);
            let added = insert_pairs(&mut fields, pairs);
            db.put_entity(key.clone(), DataEntity::Hash(fields));
            RespValue::integer(added as i64)
        }
    }
}

/// Returns how many fields were newly created.
fn insert_pairs(fields: &mut HashMap<Bytes, Bytes>, pairs: &[Bytes]) -> usize {
    let mut added = 0;
    for pair in pairs.chunks_exact(2) {
        if fields.insert(pair[0].clone(), pair[1].clone()).is_none() {
            added += 1;
        }
    }
    added
}

/// HGET key field
fn hget(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Hash(fields)) => RespValue::bulk_or_null(fields.get(&args[1]).cloned()),
        Some(_) => wrong_type(),
        None => RespValue::Null,
    }
}

/// HDEL key field [field ...]
fn hdel(db: &Db, args: &[Bytes]) -> RespValue {
    let key = &args[0];
    if db.get_entity(key).is_none() {
        return RespValue::integer(0);
    }
    let result = db.update_entity(key, |slot| match slot {
        Some(DataEntity::Hash(fields)) => {
            let removed = args[1..]
                .iter()
                .filter(|field| fields.remove(*field).is_some())
                .count();
            Ok((removed, fields.is_empty()))
        }
        _ => Err(()),
    });
    match result {
        Err(()) => wrong_type(),
        Ok((removed, emptied)) => {
            if emptied {
                db.remove(key);
            }
            RespValue::integer(removed as i64)
        }
    }
}

/// HEXISTS key field
fn hexists(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Hash(fields)) => {
            RespValue::integer(fields.contains_key(&args[1]) as i64)
        }
        Some(_) => wrong_type(),
        None => RespValue::integer(0),
    }
}

/// HLEN key
fn hlen(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Hash(fields)) => RespValue::integer(fields.len() as i64),
        Some(_) => wrong_type(),
        None => RespValue::integer(0),
    }
}

/// HGETALL key (flat field, value, field, value array)
fn hgetall(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Hash(fields)) => {
            let mut flat = Vec::with_capacity(fields.len() * 2);
            for (field, value) in fields {
                flat.push(RespValue::Bulk(field));
                flat.push(RespValue::Bulk(value));
            }
            RespValue::Array(flat)
        }
        Some(_) => wrong_type(),
        None => RespValue::empty_array(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{b, exec, test_db};
    use crate::connection::Session;

    #[tokio::test]
    async fn hset_counts_new_fields_only() {
        let db = test_db();
        let s = Session::detached();
        assert_eq!(
            exec(&db, &s, &["HSET", "h", "f1", "a", "f2", "b"]),
            RespValue::integer(2)
        );
        // f1 updated, f3 created
        assert_eq!(
            exec(&db, &s, &["HSET", "h", "f1", "z", "f3", "c"]),
            RespValue::integer(1)
        );
        assert_eq!(exec(&db, &s, &["HGET", "h", "f1"]), RespValue::bulk(b("z")));
        assert_eq!(exec(&db, &s, &["HLEN", "h"]), RespValue::integer(3));
        // dangling field without a value
        assert!(exec(&db, &s, &["HSET", "h", "f4"]).is_error());
    }

    #[tokio::test]
    async fn hget_and_hexists() {
        let db = test_db();
        let s = Session::detached();
        assert_eq!(exec(&db, &s, &["HGET", "h", "f"]), RespValue::Null);
        assert_eq!(exec(&db, &s, &["HEXISTS", "h", "f"]), RespValue::integer(0));
        exec(&db, &s, &["HSET", "h", "f", "v"]);
        assert_eq!(exec(&db, &s, &["HGET", "h", "f"]), RespValue::bulk(b("v")));
        assert_eq!(exec(&db, &s, &["HGET", "h", "other"]), RespValue::Null);
        assert_eq!(exec(&db, &s, &["HEXISTS", "h", "f"]), RespValue::integer(1));
    }

    #[tokio::test]
    async fn hdel_removes_key_when_empty() {
        let db = test_db();
        let s = Session::detached();
        exec(&db, &s, &["HSET", "h", "f1", "a", "f2", "b"]);
        assert_eq!(
            exec(&db, &s, &["HDEL", "h", "f1", "missing"]),
            RespValue::integer(1)
        );
        assert_eq!(exec(&db, &s, &["HDEL", "h", "f2"]), RespValue::integer(1));
        assert_eq!(exec(&db, &s, &["EXISTS", "h"]), RespValue::integer(0));
        assert_eq!(exec(&db, &s, &["HDEL", "h", "f1"]), RespValue::integer(0));
    }

    #[tokio::test]
    async fn hgetall_flattens_pairs() {
        let db = test_db();
        let s = Session::detached();
        assert_eq!(exec(&db, &s, &["HGETALL", "h"]), RespValue::empty_array());
        exec(&db, &s, &["HSET", "h", "f", "v"]);
        assert_eq!(
            exec(&db, &s, &["HGETALL", "h"]),
            RespValue::array(vec![RespValue::bulk(b("f")), RespValue::bulk(b("v"))])
        );
    }

    #[tokio::test]
    async fn hash_commands_reject_other_types() {
        let db = test_db();
        let s = Session::detached();
        exec(&db, &s, &["SET", "str", "v"]);
        assert_eq!(exec(&db, &s, &["HSET", "str", "f", "v"]), wrong_type());
        assert_eq!(exec(&db, &s, &["HGET", "str", "f"]), wrong_type());
    }
}
