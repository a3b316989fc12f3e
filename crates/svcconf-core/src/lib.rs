//! svcconf core - reconciliation engine for a layered service configuration
//! repository
//!
//! This crate provides:
//! - The entity model: FMRIs, typed values, layered property contributions,
//!   property groups and snapshot levels
//! - The bundle model handed over by an external loader
//! - The abstract `RepositoryClient` interface, its shared commit semantics
//!   and an in-memory backend
//! - Reconciliation: bundle import, profile apply, snapshot take/restore,
//!   dependent materialization and stale-configuration cleanup
//! - The error and logging facilities used across the workspace

pub mod bundle;
pub mod client;
pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod policy;
pub mod reconcile;
pub mod repo;
pub mod retry;
pub mod validator;

/// Re-exported for the logging macros
pub use svcconf_core_types as core_types;

// Re-export commonly used types
pub use bundle::{Bundle, DependentDecl, InstanceDecl, PgDecl, PropertyDecl, ServiceDecl};
pub use client::{
    CommitOutcome, Connector, EntityRef, PgRef, RepositoryClient, Transaction, TxEntry,
};
pub use errors::{Disposition, ExError, ExErrorKind, RepoError, RepoResult, Result};
pub use model::{Decoration, EntityKind, Fmri, Layer, PgContents, PgFlags, Value, ValueType};
pub use policy::{EnabledOnRevert, ImportOptions, RefreshPolicy};
pub use reconcile::{Applier, CleanupScanner, Importer, Progress, ReconcileReport, SnapshotManager};
pub use repo::{MemoryConnector, MemoryRepository};
pub use retry::RetryPolicy;
pub use validator::{NoSchema, SchemaValidator, StaticSchema};
