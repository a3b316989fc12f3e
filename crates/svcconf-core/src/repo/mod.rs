//! Repository backends and the commit semantics they share

pub mod memory;
pub mod txn;

pub use memory::{FaultOp, MemoryConnector, MemoryRepository};
pub use txn::{apply_entries, would_change};
