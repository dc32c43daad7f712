//! Common error type for the squib services

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Document store error: {0}")]
    Store(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Subprocess error: {0}")]
    Subprocess(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the caller should swallow the error and retry on the next
    /// polling tick instead of escalating into job state.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Store(_) | CoreError::Blob(_))
    }
}

impl From<mongodb::error::Error> for CoreError {
    fn from(err: mongodb::error::Error) -> Self {
        CoreError::Store(err.to_string())
    }
}

impl From<bson::ser::Error> for CoreError {
    fn from(err: bson::ser::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for CoreError {
    fn from(err: bson::de::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CoreError::Store("connection refused".to_string()).is_transient());
        assert!(CoreError::Blob("timeout".to_string()).is_transient());
        assert!(!CoreError::NotFound("job".to_string()).is_transient());
        assert!(!CoreError::InvalidTransition("0 -> 2".to_string()).is_transient());
    }
}
