//! # VoltKV - An In-Memory Key-Value Server with Transactions
//!
//! VoltKV is a RESP-compatible, in-memory key-value database written in
//! Rust. Beyond the usual string/list/hash/set commands it implements
//! optimistic multi-command transactions: MULTI queues commands, WATCH
//! snapshots key versions, and EXEC runs the batch atomically, aborting on
//! watched-key conflicts and rolling back via undo logs when a command
//! fails mid-batch.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                             VoltKV                                 │
//! │                                                                    │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────────────┐    │
//! │  │ TCP Server │──>│ Connection │──>│          Engine          │    │
//! │  │ (accept)   │   │  Handler   │   │  AUTH gate · SELECT      │    │
//! │  └────────────┘   └─────┬──────┘   └────────────┬─────────────┘    │
//! │                         │                       │                  │
//! │                   ┌─────┴─────┐        ┌────────┴────────┐         │
//! │                   │   RESP    │        │   Db (per idx)  │         │
//! │                   │  Codec    │        │ dict · ttl ·    │         │
//! │                   └───────────┘        │ versions · locks│         │
//! │                                        └────────┬────────┘         │
//! │                                                 │                  │
//! │                                        ┌────────┴────────┐         │
//! │                                        │   Time Wheel    │         │
//! │                                        │ (TTL dispatch)  │         │
//! │                                        └─────────────────┘         │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! - The sharded dictionary makes single-key operations safe on their own.
//! - The striped lock table serializes read-modify-write and multi-key
//!   commands; slots are always taken in ascending index order and
//!   released descending, which rules out deadlock by construction.
//! - Per-key versions advance on every write; WATCH/EXEC use them for
//!   optimistic conflict detection across the transaction window.
//! - TTLs are enforced twice: lazily on access and actively by the time
//!   wheel's scheduled deletion tasks.
//!
//! ## Module overview
//!
//! - [`protocol`]: RESP parser and serializer
//! - [`storage`]: sharded dict, striped locks, time wheel
//! - [`engine`]: databases, command registry, transaction executor
//! - [`commands`]: the concrete command implementations
//! - [`connection`]: session state and the per-connection loop
//! - [`server`]: accept loop and graceful shutdown
//! - [`client`]: pipelined async client with request timeouts
//! - [`config`]: redis.conf-style configuration loading

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod engine;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod sync;

pub use client::Client;
pub use config::ServerConfig;
pub use connection::{ConnectionHandler, ConnectionStats, Session};
pub use engine::{DataEntity, Engine};
pub use protocol::{CmdLine, ParseError, RespParser, RespValue};
pub use storage::{LockTable, ShardedDict, TimeWheel};

/// Version of VoltKV.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
