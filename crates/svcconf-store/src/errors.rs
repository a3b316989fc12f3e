//! Error handling for svcconf-store
//!
//! Migration failures surface as `ExError`; everything behind the
//! `RepositoryClient` boundary is classified into `RepoError`.

use rusqlite::ErrorCode;
use svcconf_core::errors::{ExError, ExErrorKind, RepoError};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::from(repo_error(err)).with_op("sqlite")
}

/// Classify a SQLite failure for the engine
pub fn repo_error(err: rusqlite::Error) -> RepoError {
    let code = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
        _ => None,
    };
    match code {
        Some(ErrorCode::ReadOnly) => RepoError::ReadOnly,
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => RepoError::Unreachable {
            reason: err.to_string(),
        },
        Some(ErrorCode::OutOfMemory) | Some(ErrorCode::DiskFull) => RepoError::NoResources,
        Some(ErrorCode::PermissionDenied) | Some(ErrorCode::AuthorizationForStatementDenied) => {
            RepoError::BackendAccess {
                reason: err.to_string(),
            }
        }
        _ => RepoError::Backend {
            message: err.to_string(),
        },
    }
}

/// Whether a statement failed on a UNIQUE constraint
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

/// A stored JSON column that no longer parses
pub fn corrupt(what: &str, err: serde_json::Error) -> RepoError {
    RepoError::Backend {
        message: format!("corrupt {}: {}", what, err),
    }
}
