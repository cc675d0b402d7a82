use thiserror::Error;

/// Failure classes of a PostgREST call. Returned inside `anyhow::Error`
/// so callers can `downcast` instead of matching on message text.
#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("Authentication error: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PostgrestError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => PostgrestError::Unauthorized(body),
            404 => PostgrestError::NotFound(body),
            409 => PostgrestError::Conflict(body),
            _ => PostgrestError::Api { status, body },
        }
    }
}
