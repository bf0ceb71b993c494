//! Storage Primitives
//!
//! The concurrent building blocks the database engine composes:
//!
//! - [`dict`]: sharded dictionary with per-shard reader/writer locks
//! - [`locks`]: fixed-size striped lock table for multi-key operations
//! - [`wheel`]: hashed time wheel driving TTL expiration
//!
//! All three hash keys with the same 32-bit FNV-1a so a key's placement is
//! consistent across them.

pub mod dict;
pub mod locks;
pub mod wheel;

pub use dict::{fnv1a, ShardedDict};
pub use locks::{KeyGuard, LockTable, MultiKeyGuard};
pub use wheel::{Job, TimeWheel};
