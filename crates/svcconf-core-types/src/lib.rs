//! Core types shared across svcconf facilities
//!
//! - **Correlation types**: RequestId, TraceId, RequestContext
//! - **Schema constants**: Canonical field keys and event names used by
//!   the logging facility and the reconciliation report

pub mod correlation;
pub mod schema;

pub use correlation::{RequestContext, RequestId, TraceId};
