use thiserror::Error;
use uuid::Uuid;

use shared_database::PostgrestError;
use shared_models::error::AppError;

use crate::models::AnalysisStatus;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Concurrent update detected: {0}")]
    ConcurrencyConflict(String),

    #[error("Invalid analysis status transition from {from} to {to}")]
    InvalidStatusTransition { from: AnalysisStatus, to: AnalysisStatus },

    #[error("Archival of analysis {analysis_id} failed: {reason}")]
    ArchivalFailed { analysis_id: Uuid, reason: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        AnalysisError::NotFound { entity, id }
    }

    /// Transient failures may succeed on a later run.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::ConcurrencyConflict(_) | AnalysisError::Store(_))
    }
}

impl From<anyhow::Error> for AnalysisError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<PostgrestError>() {
            Ok(PostgrestError::Conflict(body)) => AnalysisError::ConcurrencyConflict(body),
            Ok(PostgrestError::Decode(e)) => AnalysisError::Serialization(e),
            Ok(other) => AnalysisError::Store(other.to_string()),
            Err(err) => AnalysisError::Store(err.to_string()),
        }
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Validation(msg) => AppError::ValidationError(msg),
            AnalysisError::NotFound { .. } => AppError::NotFound(err.to_string()),
            AnalysisError::ConcurrencyConflict(_) => AppError::Conflict(err.to_string()),
            AnalysisError::InvalidStatusTransition { .. } => AppError::Conflict(err.to_string()),
            AnalysisError::ArchivalFailed { .. } => AppError::Internal(err.to_string()),
            AnalysisError::Store(msg) => AppError::Database(msg),
            AnalysisError::Serialization(e) => AppError::Internal(e.to_string()),
        }
    }
}
