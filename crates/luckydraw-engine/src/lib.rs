//! Runtime for the Lucky Draw number caller: the session engine event loop,
//! the SQLite-backed persistent store, and the durable write queues between
//! them. The `luckydraw` binary in this crate is a thin terminal front end.

pub mod engine;
pub mod persist;
pub mod store;
