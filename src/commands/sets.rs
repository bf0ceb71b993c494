//! Set Commands
//!
//! Unordered member sets. A set that loses its last member is removed from
//! the keyspace.

use crate::commands::{read_first_key, rollback_first_key, wrong_type, write_first_key};
use crate::engine::db::Db;
use crate::engine::entity::DataEntity;
use crate::engine::registry::CommandTable;
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashSet;

pub fn register(table: &mut CommandTable) {
    table.register("sadd", sadd, Some(write_first_key), Some(rollback_first_key), -3);
    table.register("srem", srem, Some(write_first_key), Some(rollback_first_key), -3);
    table.register("sismember", sismember, Some(read_first_key), None, 3);
    table.register("scard", scard, Some(read_first_key), None, 2);
    table.register("smembers", smembers, Some(read_first_key), None, 2);
}

/// SADD key member [member ...]
fn sadd(db: &Db, args: &[Bytes]) -> RespValue {
    let key = &args[0];
    let members = &args[1..];

    let result = db.update_entity(key, |slot| match slot {
        Some(DataEntity::Set(set)) => Ok(Some(
            members.iter().filter(|m| set.insert((*m).clone())).count(),
        )),
        Some(_) => Err(()),
        None => Ok(None),
    });

    match result {
        Err(()) => wrong_type(),
        Ok(Some(added)) => RespValue::integer(added as i64),
        Ok(None) => {
            let set: HashSet<Bytes> = members.iter().cloned().collect();
            let added = set.len();
            db.put_entity(key.clone(), DataEntity::Set(set));
            RespValue::integer(added as i64)
        }
    }
}

/// SREM key member [member ...]
fn srem(db: &Db, args: &[Bytes]) -> RespValue {
    let key = &args[0];
    if db.get_entity(key).is_none() {
        return RespValue::integer(0);
    }
    let result = db.update_entity(key, |slot| match slot {
        Some(DataEntity::Set(set)) => {
            let removed = args[1..].iter().filter(|m| set.remove(*m)).count();
            Ok((removed, set.is_empty()))
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

/// SISMEMBER key member
fn sismember(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Set(set)) => RespValue::integer(set.contains(&args[1]) as i64),
        Some(_) => wrong_type(),
        None => RespValue::integer(0),
    }
}

/// SCARD key
fn scard(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Set(set)) => RespValue::integer(set.len() as i64),
        Some(_) => wrong_type(),
        None => RespValue::integer(0),
    }
}

/// SMEMBERS key
fn smembers(db: &Db, args: &[Bytes]) -> RespValue {
    match db.get_entity(&args[0]) {
        Some(DataEntity::Set(set)) => {
            RespValue::Array(set.into_iter().map(RespValue::Bulk).collect())
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
    async fn sadd_counts_new_members() {
        let db = test_db();
        let s = Session::detached();
        assert_eq!(exec(&db, &s, &["SADD", "s", "a", "b", "a"]), RespValue::integer(2));
        assert_eq!(exec(&db, &s, &["SADD", "s", "b", "c"]), RespValue::integer(1));
        assert_eq!(exec(&db, &s, &["SCARD", "s"]), RespValue::integer(3));
    }

    #[tokio::test]
    async fn membership_checks() {
        let db = test_db();
        let s = Session::detached();
        assert_eq!(exec(&db, &s, &["SISMEMBER", "s", "a"]), RespValue::integer(0));
        exec(&db, &s, &["SADD", "s", "a"]);
        assert_eq!(exec(&db, &s, &["SISMEMBER", "s", "a"]), RespValue::integer(1));
        assert_eq!(exec(&db, &s, &["SISMEMBER", "s", "b"]), RespValue::integer(0));
    }

    #[tokio::test]
    async fn srem_removes_key_when_empty() {
        let db = test_db();
        let s = Session::detached();
        exec(&db, &s, &["SADD", "s", "a", "b"]);
        assert_eq!(
            exec(&db, &s, &["SREM", "s", "a", "missing"]),
            RespValue::integer(1)
        );
        assert_eq!(exec(&db, &s, &["SREM", "s", "b"]), RespValue::integer(1));
        assert_eq!(exec(&db, &s, &["EXISTS", "s"]), RespValue::integer(0));
        assert_eq!(exec(&db, &s, &["SREM", "s", "a"]), RespValue::integer(0));
    }

    #[tokio::test]
    async fn smembers_lists_everything() {
        let db = test_db();
        let s = Session::detached();
        assert_eq!(exec(&db, &s, &["SMEMBERS", "s"]), RespValue::empty_array());
        exec(&db, &s, &["SADD", "s", "a", "b"]);
        let reply = exec(&db, &s, &["SMEMBERS", "s"]);
        let RespValue::Array(members) = reply else {
            panic!("unexpected smembers reply");
        };
        let mut names: Vec<Bytes> = members
            .into_iter()
            .map(|v| v.as_bytes().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec![b("a"), b("b")]);
    }

    #[tokio::test]
    async fn set_commands_reject_other_types() {
        let db = test_db();
        let s = Session::detached();
        exec(&db, &s, &["SET", "str", "v"]);
        assert_eq!(exec(&db, &s, &["SADD", "str", "x"]), wrong_type());
        assert_eq!(exec(&db, &s, &["SCARD", "str"]), wrong_type());
    }
}
