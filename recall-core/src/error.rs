use thiserror::Error;

/// Error type for core domain operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid timestamp value in an export payload
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// Unrecognized message role
    #[error("Unknown message role '{0}'")]
    UnknownRole(String),

    /// JSON shape did not match what the caller expected
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn invalid_timestamp(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload(reason.into())
    }
}
