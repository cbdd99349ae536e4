use thiserror::Error;

/// Errors surfaced by the import pipeline.
///
/// Per-conversation extraction failures are collected into the
/// `ImportResult` instead of aborting the whole import; the variants here
/// are the ones that stop an import outright or describe a single failed
/// conversation.
#[derive(Error, Debug)]
pub enum ImportError {
    /// Payload shape matched no registered format.
    #[error(
        "Could not detect file format. Supported formats: {}. \
         Please ensure your file is a valid export from one of these sources.",
        .available.join(", ")
    )]
    FormatDetection { available: Vec<String> },

    /// Format recognized but its extractor is not registered - a system
    /// configuration issue, not a user error.
    #[error(
        "Format '{format}' was detected in your file, but the importer is not available. \
         Available importers: {}",
        .available.join(", ")
    )]
    ImporterNotAvailable {
        format: String,
        available: Vec<String>,
    },

    /// Extractor failed on an individual conversation.
    #[error("Failed to extract messages from {format} format: {reason}")]
    Extraction { format: String, reason: String },

    /// Licensed format attempted without the capability.
    #[error(
        "{format} import requires a Pro license. This feature is not available in the \
         free version; please upgrade to import {format} conversations."
    )]
    LicenseRequired { format: String },

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ImportError {
    pub fn extraction(format: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            format: format.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_error_lists_registered_formats() {
        let err = ImportError::FormatDetection {
            available: vec!["chatgpt".into(), "claude".into()],
        };
        let message = err.to_string();
        assert!(message.contains("chatgpt, claude"));
        assert!(message.contains("Could not detect"));
    }

    #[test]
    fn license_error_names_the_format() {
        let err = ImportError::LicenseRequired {
            format: "ChatGPT".into(),
        };
        assert!(err.to_string().contains("ChatGPT import requires a Pro license"));
    }
}
