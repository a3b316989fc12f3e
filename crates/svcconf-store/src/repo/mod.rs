//! Repository layer: the SQLite `RepositoryClient`

pub mod connector;
pub mod sqlite_repo;

pub use connector::SqliteConnector;
pub use sqlite_repo::SqliteRepository;
