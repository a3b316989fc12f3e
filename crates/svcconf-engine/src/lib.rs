//! svcconf engine - orchestration layer
//!
//! Wires the reconciliation core to a repository backend: engine
//! configuration, a lazily connected repository session, and the façade
//! that brackets each top-level call with request context and operation
//! logging.

pub mod commands;
pub mod config;
pub mod session;

pub use commands::engine::Engine;
pub use commands::engine_command::{apply_engine_command, EngineCommand, EngineCommandResult};
pub use config::EngineConfig;
pub use session::Session;
