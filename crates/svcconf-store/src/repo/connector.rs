use std::path::{Path, PathBuf};

use svcconf_core::client::Connector;
use svcconf_core::errors::Result;

use super::SqliteRepository;

/// Opens (and migrates) one database file per connection
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for SqliteConnector {
    type Client = SqliteRepository;

    fn connect(&self) -> Result<SqliteRepository> {
        SqliteRepository::open(&self.path)
    }
}
