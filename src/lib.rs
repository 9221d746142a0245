//! Query manager for the game back-end fleet.
//!
//! A loopback-only TCP service that mediates all database access for the
//! collaborating back-ends: game servers, the login gateway and the
//! web/admin front-ends connect, authorize with a shared secret, and issue
//! length-prefixed binary queries that run as explicit transactions against
//! an embedded SQLite store.

/// Server configuration (key=value file)
pub mod config;
/// Signals, monotonic clock, shutdown flag
pub mod core;
/// Wire codec (length-prefixed frames and strings)
pub mod codec;
/// Listener, connection slots, event loop, password primitive, host cache
pub mod network;
/// Embedded store: statement cache, transactions, typed table operations
pub mod database;
/// Query dispatch and handlers
pub mod query;
