//! Error types shared across the DRP workspace

use thiserror::Error;

/// Result type alias for DRP operations
pub type Result<T> = std::result::Result<T, DrpError>;

/// Main error type for DRP
#[derive(Error, Debug)]
pub enum DrpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = DrpError::NotFound("upload 42".to_string());
        assert_eq!(err.to_string(), "Not found: upload 42");

        let err = DrpError::Validation("batch size must be > 0".to_string());
        assert_eq!(err.to_string(), "Validation error: batch size must be > 0");
    }
}
