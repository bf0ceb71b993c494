//! Database Engine
//!
//! [`db::Db`] is one keyspace; [`Engine`] is the standalone server around a
//! vector of them. The engine owns the frozen command table and the shared
//! time wheel, gates every command behind AUTH when `requirepass` is
//! configured, serves SELECT, and dispatches everything else to the
//! session's current database.

pub mod db;
pub mod entity;
pub mod registry;
pub mod transaction;

use crate::config::ServerConfig;
use crate::connection::Session;
use crate::engine::db::Db;
use crate::engine::registry::{command_name, CommandTable};
use crate::protocol::{CmdLine, RespValue};
use crate::storage::TimeWheel;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use entity::DataEntity;

/// Tick granularity of the shared expiration wheel.
const WHEEL_TICK: Duration = Duration::from_millis(100);
const WHEEL_SLOTS: usize = 1 << 10;

/// The standalone multi-database engine shared by every connection.
#[derive(Debug)]
pub struct Engine {
    dbs: Vec<Arc<Db>>,
    require_pass: String,
    /// Held so the expiration dispatcher lives as long as the engine.
    wheel: Arc<TimeWheel>,
}

impl Engine {
    pub fn new(config: &ServerConfig) -> Arc<Self> {
        let table = CommandTable::standard();
        let wheel = Arc::new(TimeWheel::start(WHEEL_TICK, WHEEL_SLOTS));
        let dbs = (0..config.databases.max(1))
            .map(|index| Db::new(index, Arc::clone(&table), Arc::clone(&wheel)))
            .collect::<Vec<_>>();
        info!(databases = dbs.len(), "engine initialized");
        Arc::new(Self {
            dbs,
            require_pass: config.require_pass.clone(),
            wheel,
        })
    }

    /// Number of configured databases.
    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    /// Direct access to one keyspace, for tests and maintenance tasks.
    pub fn db(&self, index: usize) -> Option<&Arc<Db>> {
        self.dbs.get(index)
    }

    /// Runs one command line on behalf of a session. Replies are values;
    /// evaluation never raises.
    pub fn exec(&self, session: &Session, cmd_line: &CmdLine) -> RespValue {
        if cmd_line.is_empty() {
            return RespValue::error("ERR empty command");
        }
        let name = command_name(cmd_line);

        // AUTH works even before authentication, by definition
        if name == "auth" {
            return self.auth(session, cmd_line);
        }
        if !self.authenticated(session) {
            return RespValue::error("NOAUTH Authentication required.");
        }
        if name == "select" {
            return self.select(session, cmd_line);
        }

        self.dbs[session.db_index().min(self.dbs.len() - 1)].exec(session, cmd_line)
    }

    /// AUTH password: remembers the presented password on the session; the
    /// gate compares it against `requirepass` on every later command.
    fn auth(&self, session: &Session, cmd_line: &CmdLine) -> RespValue {
        if cmd_line.len() != 2 {
            return RespValue::arity_error("auth");
        }
        if self.require_pass.is_empty() {
            return RespValue::error(
                "ERR Client sent AUTH, but no password is set",
            );
        }
        let presented = String::from_utf8_lossy(&cmd_line[1]).into_owned();
        session.set_password(presented.clone());
        if presented != self.require_pass {
            return RespValue::error("ERR invalid password");
        }
        RespValue::ok()
    }

    fn authenticated(&self, session: &Session) -> bool {
        self.require_pass.is_empty() || session.password().as_deref() == Some(&self.require_pass)
    }

    /// SELECT index
    fn select(&self, session: &Session, cmd_line: &CmdLine) -> RespValue {
        if cmd_line.len() != 2 {
            return RespValue::arity_error("select");
        }
        match crate::commands::parse_int(&cmd_line[1]) {
            Some(index) if index >= 0 && (index as usize) < self.dbs.len() => {
                session.select_db(index as usize);
                RespValue::ok()
            }
            Some(_) => RespValue::error("ERR DB index is out of range"),
            None => RespValue::error("ERR value is not an integer or out of range"),
        }
    }

    /// Stops background work; called once on server shutdown.
    pub fn close(&self) {
        self.wheel.stop();
    }
}
