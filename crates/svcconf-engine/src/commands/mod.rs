//! Engine operations

pub mod engine;
pub mod engine_command;
