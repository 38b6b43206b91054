//! Error types for the map subsystem.
//!
//! Only recoverable conditions live here. Consistency violations (binding
//! mismatches, duplicate map keys, instance requests that cannot resolve an
//! instance id) abort via `panic!` after an `error!` line instead.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("Unknown map template {0}")]
    InvalidTemplate(u32),

    #[error("Map {template_id}:{instance_id} not found")]
    NotFound { template_id: u32, instance_id: u32 },

    #[error("Worker pool error: {0}")]
    ThreadPool(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
