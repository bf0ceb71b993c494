//! Database Engine
//!
//! A `Db` composes the storage primitives into one keyspace:
//!
//! - `data`: key -> [`DataEntity`]
//! - `ttl_map`: key -> absolute expiration time, backed by a scheduled
//!   time-wheel task per entry
//! - `version_map`: key -> monotonically increasing counter, bumped on
//!   every write and snapshotted by WATCH
//! - `locker`: striped lock table serializing multi-key work
//!
//! `exec` is the single entry point: transaction control commands route to
//! the transaction executor, commands on a session in MULTI state are
//! queued, and everything else runs immediately under its prepared lock
//! set.
//!
//! FLUSHDB uses a stop-the-world gate: the flush raises the gate, every
//! data operation waits on it, and the gate drops once both dictionaries
//! are cleared and the lock table has been replaced.

use crate::connection::Session;
use crate::engine::entity::DataEntity;
use crate::engine::registry::{command_name, validate_arity, CommandTable};
use crate::engine::transaction;
use crate::protocol::{CmdLine, RespValue};
use crate::storage::{LockTable, ShardedDict, TimeWheel};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::time::SystemTime;
use tracing::debug;

/// Sizing taken over from the original deployment: a large data dictionary,
/// a small TTL dictionary, and a kilobyte-sized lock table.
const DATA_DICT_CAPACITY: usize = 1 << 16;
const TTL_DICT_CAPACITY: usize = 1 << 10;
const VERSION_DICT_CAPACITY: usize = 1 << 16;
const LOCKER_SIZE: usize = 1024;

/// Two-phase barrier for FLUSHDB: the flush raises it, data operations wait
/// on it. Cheaper than wrapping the engine in one big reader/writer lock,
/// which would serialize ordinary commands against each other.
#[derive(Debug, Default)]
struct StopWorld {
    raised: Mutex<usize>,
    released: Condvar,
}

impl StopWorld {
    fn raise(&self) {
        *self.raised.lock().unwrap() += 1;
    }

    fn lower(&self) {
        let mut raised = self.raised.lock().unwrap();
        *raised -= 1;
        if *raised == 0 {
            self.released.notify_all();
        }
    }

    fn wait(&self) {
        let mut raised = self.raised.lock().unwrap();
        while *raised > 0 {
            raised = self.released.wait(raised).unwrap();
        }
    }
}

/// One keyspace with its versioning, TTLs and lock table.
#[derive(Debug)]
pub struct Db {
    index: usize,
    data: ShardedDict<DataEntity>,
    ttl_map: ShardedDict<SystemTime>,
    version_map: ShardedDict<u32>,
    /// Replaced wholesale on FLUSHDB; acquisitions clone the `Arc` first so
    /// held guards keep the table they came from alive.
    locker: RwLock<Arc<LockTable>>,
    stop_world: StopWorld,
    wheel: Arc<TimeWheel>,
    table: Arc<CommandTable>,
    /// Handle to ourselves for expiration callbacks.
    self_ref: Weak<Db>,
}

impl Db {
    pub fn new(index: usize, table: Arc<CommandTable>, wheel: Arc<TimeWheel>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            index,
            data: ShardedDict::new(DATA_DICT_CAPACITY),
            ttl_map: ShardedDict::new(TTL_DICT_CAPACITY),
            version_map: ShardedDict::new(VERSION_DICT_CAPACITY),
            locker: RwLock::new(Arc::new(LockTable::new(LOCKER_SIZE))),
            stop_world: StopWorld::default(),
            wheel,
            table,
            self_ref: self_ref.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn command_table(&self) -> &CommandTable {
        &self.table
    }

    /// The current lock table. Callers keep the returned `Arc` alive for as
    /// long as they hold guards from it.
    pub(crate) fn locker(&self) -> Arc<LockTable> {
        self.locker.read().unwrap().clone()
    }

    /* ---------- dispatch ---------- */

    /// Executes one command line for a session: transaction control first,
    /// then queueing while in MULTI, then normal execution.
    pub fn exec(&self, session: &Session, cmd_line: &[Bytes]) -> RespValue {
        let name = command_name(cmd_line);
        match name.as_str() {
            "multi" => {
                if cmd_line.len() != 1 {
                    return RespValue::arity_error(&name);
                }
                transaction::start_multi(session)
            }
            "discard" => {
                if cmd_line.len() != 1 {
                    return RespValue::arity_error(&name);
                }
                transaction::discard_multi(session)
            }
            "exec" => {
                if cmd_line.len() != 1 {
                    return RespValue::arity_error(&name);
                }
                transaction::exec_multi(self, session)
            }
            "watch" => {
                if !validate_arity(-2, cmd_line.len()) {
                    return RespValue::arity_error(&name);
                }
                transaction::watch(self, session, &cmd_line[1..])
            }
            _ if session.in_multi_state() => transaction::enqueue(self, session, cmd_line),
            _ => self.exec_normal(&name, cmd_line),
        }
    }

    /// Executes a command outside any transaction: validate, prepare keys,
    /// bump write versions, take the combined locks, run, release.
    fn exec_normal(&self, name: &str, cmd_line: &[Bytes]) -> RespValue {
        let Some(cmd) = self.table.lookup(name) else {
            return RespValue::unknown_command(name);
        };
        if !validate_arity(cmd.arity, cmd_line.len()) {
            return RespValue::arity_error(name);
        }

        let args = &cmd_line[1..];
        let (write_keys, read_keys) = match cmd.prepare {
            Some(prepare) => prepare(args),
            None => (Vec::new(), Vec::new()),
        };

        // versions move before the lock is taken; an EXEC acquiring after
        // us observes the bump and aborts if it watched the key
        self.add_version(&write_keys);

        let locker = self.locker();
        let _guard = locker.lock_multi(&write_keys, &read_keys);
        (cmd.executor)(self, args)
    }

    /// Executes a command assuming its locks are already held; used by the
    /// transaction executor for queued commands and undo replay.
    pub(crate) fn exec_with_lock(&self, cmd_line: &[Bytes]) -> RespValue {
        let name = command_name(cmd_line);
        let Some(cmd) = self.table.lookup(&name) else {
            return RespValue::unknown_command(&name);
        };
        if !validate_arity(cmd.arity, cmd_line.len()) {
            return RespValue::arity_error(&name);
        }
        (cmd.executor)(self, &cmd_line[1..])
    }

    /// The undo command lines for one queued command, or empty when the
    /// command is unknown or not undoable.
    pub(crate) fn undo_logs(&self, cmd_line: &[Bytes]) -> Vec<CmdLine> {
        let name = command_name(cmd_line);
        match self.table.lookup(&name).and_then(|cmd| cmd.undo) {
            Some(undo) => undo(self, &cmd_line[1..]),
            None => Vec::new(),
        }
    }

    /* ---------- versions ---------- */

    /// Bumps the version of each key. Missing entries start at zero.
    pub fn add_version(&self, keys: &[Bytes]) {
        for key in keys {
            let next = self.version(key).wrapping_add(1);
            self.data_version_put(key, next);
        }
    }

    fn data_version_put(&self, key: &Bytes, version: u32) {
        self.version_map.put(key.clone(), version);
    }

    /// Current version of a key; zero when never written.
    pub fn version(&self, key: &[u8]) -> u32 {
        self.version_map.get(key).unwrap_or(0)
    }

    /* ---------- data ---------- */

    /// Reads an entity; expired keys are removed on the way and read as
    /// absent.
    pub fn get_entity(&self, key: &[u8]) -> Option<DataEntity> {
        self.stop_world.wait();
        let entity = self.data.get(key)?;
        if self.is_expired(key) {
            return None;
        }
        Some(entity)
    }

    /// Inserts or overwrites. Returns `true` when the key was new.
    pub fn put_entity(&self, key: Bytes, entity: DataEntity) -> bool {
        self.stop_world.wait();
        self.data.put(key, entity)
    }

    pub fn put_if_exists(&self, key: Bytes, entity: DataEntity) -> bool {
        self.stop_world.wait();
        self.data.put_if_exists(key, entity)
    }

    pub fn put_if_absent(&self, key: Bytes, entity: DataEntity) -> bool {
        self.stop_world.wait();
        self.data.put_if_absent(key, entity)
    }

    /// Mutates an entity in place under its shard lock.
    pub fn update_entity<R>(&self, key: &[u8], f: impl FnOnce(Option<&mut DataEntity>) -> R) -> R {
        self.stop_world.wait();
        self.data.mutate(key, f)
    }

    /// Removes a key together with its TTL entry and scheduled expiration.
    pub fn remove(&self, key: &[u8]) -> bool {
        self.stop_world.wait();
        let removed = self.data.remove(key);
        self.ttl_map.remove(key);
        self.wheel.cancel(&self.expire_task_key(key));
        removed
    }

    /// Removes several keys; returns how many existed.
    pub fn removes(&self, keys: &[Bytes]) -> usize {
        self.stop_world.wait();
        let mut deleted = 0;
        for key in keys {
            if self.data.get(key).is_some() {
                self.remove(key);
                deleted += 1;
            }
        }
        deleted
    }

    /// Number of live keys (expired-but-unswept entries included).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Visits every key and entity.
    pub fn for_each(&self, visitor: impl FnMut(&Bytes, &DataEntity) -> bool) {
        self.stop_world.wait();
        self.data.for_each(visitor);
    }

    /// Random present keys, possibly with repeats.
    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        self.data.random_keys(limit)
    }

    /// Clears data, TTLs and versions and installs a fresh lock table.
    /// Data operations wait while this runs.
    pub fn flush(&self) {
        self.stop_world.raise();
        self.data.clear();
        self.ttl_map.clear();
        self.version_map.clear();
        *self.locker.write().unwrap() = Arc::new(LockTable::new(LOCKER_SIZE));
        self.stop_world.lower();
    }

    /* ---------- time to live ---------- */

    fn expire_task_key(&self, key: &[u8]) -> Bytes {
        let mut task_key = BytesMut::with_capacity(16 + key.len());
        task_key.put_slice(format!("expire:{}:", self.index).as_bytes());
        task_key.put_slice(key);
        task_key.freeze()
    }

    /// Records an absolute expiration and schedules the deletion task. The
    /// task re-reads the TTL under the key's write lock before deleting,
    /// because the TTL may have been reset while the task waited.
    pub fn expire(&self, key: &Bytes, at: SystemTime) {
        self.stop_world.wait();
        self.ttl_map.put(key.clone(), at);

        let weak = self.self_ref.clone();
        let key = key.clone();
        self.wheel.at(
            at,
            self.expire_task_key(&key),
            Box::new(move || {
                let Some(db) = weak.upgrade() else {
                    return;
                };
                let locker = db.locker();
                let _guard = locker.lock(&key);
                debug!(db = db.index, key = %String::from_utf8_lossy(&key), "ttl fired");
                // the ttl may have changed while we waited for the lock
                let Some(deadline) = db.ttl_map.get(&key) else {
                    return;
                };
                if SystemTime::now() >= deadline {
                    db.remove(&key);
                }
            }),
        );
    }

    /// Drops a key's TTL and cancels its scheduled expiration.
    pub fn persist(&self, key: &[u8]) -> bool {
        self.stop_world.wait();
        let had_ttl = self.ttl_map.remove(key);
        self.wheel.cancel(&self.expire_task_key(key));
        had_ttl
    }

    /// The absolute expiration recorded for a key, if any.
    pub fn time_to_live(&self, key: &[u8]) -> Option<SystemTime> {
        self.ttl_map.get(key)
    }

    /// Lazy expiry check: removes and reports a key whose deadline passed.
    pub fn is_expired(&self, key: &[u8]) -> bool {
        let Some(deadline) = self.ttl_map.get(key) else {
            return false;
        };
        let expired = SystemTime::now() >= deadline;
        if expired {
            self.remove(key);
        }
        expired
    }

    /* ---------- transactions ---------- */

    /// Runs a queued command batch atomically: combined locks, watch
    /// validation, undo-log rollback on mid-batch failure.
    pub fn exec_transaction(
        &self,
        watching: &HashMap<Bytes, u32>,
        cmd_lines: &[CmdLine],
    ) -> RespValue {
        transaction::exec_batch(self, watching, cmd_lines)
    }
}
