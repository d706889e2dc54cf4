//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field `{0}` has an invalid type")]
    InvalidField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::MissingField("id");
        assert!(err.to_string().contains("id"));

        let err = ProtocolError::InvalidField("id");
        assert!(err.to_string().contains("invalid type"));
    }
}
