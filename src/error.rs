//! Error types for Thermal Flux

use thiserror::Error;

/// Errors surfaced by the engine, its persistence layer and operator controls.
///
/// Insufficient or missing sensor data is never an error: those cases yield
/// `None` results and readiness flags instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Zone already registered: {0}")]
    DuplicateZone(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),
}
