//! Stored Values
//!
//! The engine stores values as an opaque tagged variant; it never looks
//! inside one. Command executors downcast to the variant they expect and
//! answer `WRONGTYPE` when a key holds something else.

use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

/// A value bound to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEntity {
    /// Binary-safe string, the SET/GET family.
    Str(Bytes),
    /// Deque of elements, pushed and popped at either end.
    List(VecDeque<Bytes>),
    /// Field -> value map.
    Hash(HashMap<Bytes, Bytes>),
    /// Unordered member set.
    Set(HashSet<Bytes>),
}

impl DataEntity {
    /// The name TYPE reports for this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataEntity::Str(_) => "string",
            DataEntity::List(_) => "list",
            DataEntity::Hash(_) => "hash",
            DataEntity::Set(_) => "set",
        }
    }

    pub fn as_str(&self) -> Option<&Bytes> {
        match self {
            DataEntity::Str(b) => Some(b),
            _ => None,
        }
    }
}
