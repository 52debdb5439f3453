use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error surfaced across the engine boundary.
///
/// Serializes as `{"kind": "...", "message": "..."}` so hosts can route on
/// the kind without parsing the message.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("config conflict: {0}")]
    ConfigConflict(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("bias unavailable: {0}")]
    BiasUnavailable(String),
}
