//! # docwire-client
//!
//! Async client for the legacy document-database wire protocol.
//!
//! This crate provides:
//! - `Connection`: one socket, sequential request/reply, self-healing writes
//! - `Pool`: factory-backed connection pool with scoped leases
//! - `Cursor`: lazy, shared query results paged with get-more
//! - Connection URL parsing and auth contexts

pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod pool;

#[cfg(test)]
mod mock;

pub use config::{parse_url, AuthContext, ConnectionConfig, PoolConfig};
pub use connection::Connection;
pub use cursor::Cursor;
pub use error::ClientError;
pub use pool::{Pool, PooledConnection};
