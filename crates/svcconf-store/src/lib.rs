//! svcconf store - SQLite backend for the configuration repository
//!
//! Provides:
//! - SQLite schema with a checksummed migrations framework
//! - `SqliteRepository`, a `RepositoryClient` over one database file
//! - `SqliteConnector` for opening it lazily

pub mod db;
pub mod errors;
pub mod migrations;
pub mod repo;

// Re-export key types
pub use errors::Result;
pub use repo::{SqliteConnector, SqliteRepository};
