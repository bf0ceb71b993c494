//! Client Connections
//!
//! - [`session`]: per-client state (auth, subscriptions, MULTI queue,
//!   watch map, selected database) and the serialized, drain-on-close
//!   reply writer
//! - [`handler`]: the per-connection read-parse-execute-reply task

pub mod handler;
pub mod session;

pub use handler::{ConnectionError, ConnectionHandler, ConnectionStats};
pub use session::Session;
