//! Server Commands
//!
//! Connection liveness and whole-database operations. AUTH and SELECT are
//! not here: they need session state and are handled by the engine before
//! per-database dispatch.

use crate::engine::db::Db;
use crate::engine::registry::{no_prepare, CommandTable};
use crate::protocol::RespValue;
use bytes::Bytes;

pub fn register(table: &mut CommandTable) {
    table.register("ping", ping, Some(no_prepare), None, -1);
    table.register("echo", echo, Some(no_prepare), None, 2);
    table.register("dbsize", dbsize, Some(no_prepare), None, 1);
    table.register("flushdb", flushdb, Some(no_prepare), None, 1);
}

/// PING [message]
fn ping(_db: &Db, args: &[Bytes]) -> RespValue {
    match args.len() {
        0 => RespValue::pong(),
        1 => RespValue::status(String::from_utf8_lossy(&args[0]).into_owned()),
        _ => RespValue::arity_error("ping"),
    }
}

/// ECHO message
fn echo(_db: &Db, args: &[Bytes]) -> RespValue {
    RespValue::Bulk(args[0].clone())
}

/// DBSIZE
fn dbsize(db: &Db, _args: &[Bytes]) -> RespValue {
    RespValue::integer(db.len() as i64)
}

/// FLUSHDB
fn flushdb(db: &Db, _args: &[Bytes]) -> RespValue {
    db.flush();
    RespValue::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{b, exec, test_db};
    use crate::connection::Session;

    #[tokio::test]
    async fn ping_with_and_without_message() {
        let db = test_db();
        let s = Session::detached();
        assert_eq!(exec(&db, &s, &["PING"]), RespValue::pong());
        assert_eq!(exec(&db, &s, &["PING", "hi"]), RespValue::status("hi"));
        assert!(exec(&db, &s, &["PING", "a", "b"]).is_error());
    }

    #[tokio::test]
    async fn echo_round_trips() {
        let db = test_db();
        let s = Session::detached();
        assert_eq!(exec(&db, &s, &["ECHO", "hello"]), RespValue::bulk(b("hello")));
    }

    #[tokio::test]
    async fn dbsize_and_flushdb() {
        let db = test_db();
        let s = Session::detached();
        exec(&db, &s, &["MSET", "a", "1", "b", "2"]);
        assert_eq!(exec(&db, &s, &["DBSIZE"]), RespValue::integer(2));
        assert_eq!(exec(&db, &s, &["FLUSHDB"]), RespValue::ok());
        assert_eq!(exec(&db, &s, &["DBSIZE"]), RespValue::integer(0));
        assert_eq!(exec(&db, &s, &["GET", "a"]), RespValue::Null);
    }
}
