//! Small synchronization helpers shared by the connection and client layers.

pub mod wait;

pub use wait::Wait;
