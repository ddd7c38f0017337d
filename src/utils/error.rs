use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for the analytics daemon.
///
/// Kinds mirror the recovery table: every engine failure is recoverable and
/// local to the engine method; the dispatcher maps these into neutral
/// payloads or log lines and never crashes.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum CogniError {
    /// Engine has no trained model yet.
    #[error("Model not ready: {engine}")]
    ModelNotReady { engine: String },

    /// Missing or malformed request fields.
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Not enough data to fit a model.
    #[error("Insufficient training data: {reason}")]
    InsufficientData { reason: String },

    /// NaN gradients, singular scalers, zero denominators.
    #[error("Numeric failure in {operation}: {reason}")]
    Numeric { operation: String, reason: String },

    /// Model Store I/O or permission failure.
    #[error("Persistence error: {operation}, reason: {reason}")]
    Persistence { operation: String, reason: String },

    /// Encoding or decoding of a snapshot or wire message failed.
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

pub type CogniResult<T> = Result<T, CogniError>;

impl CogniError {
    pub fn not_ready(engine: &str) -> Self {
        Self::ModelNotReady {
            engine: engine.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn numeric(operation: &str, reason: impl Into<String>) -> Self {
        Self::Numeric {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub fn persistence(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_context() {
        let err = CogniError::invalid("matrix", "expected 3 rows, got 2");
        assert_eq!(
            err.to_string(),
            "Invalid input: matrix - expected 3 rows, got 2"
        );

        let err = CogniError::not_ready("security");
        assert!(err.to_string().contains("security"));
    }

    #[test]
    fn errors_round_trip_through_serde() {
        let err = CogniError::numeric("median", "empty slice");
        let json = serde_json::to_string(&err).unwrap();
        let back: CogniError = serde_json::from_str(&json).unwrap();
        assert_eq!(err.to_string(), back.to_string());
    }
}
