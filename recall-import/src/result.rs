use std::fmt;

/// Outcome of one import call: counts plus progress notes and per-item
/// errors for surfacing to the caller.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    /// Conversations newly created.
    pub imported_count: usize,
    /// Conversations skipped because content was already indexed.
    pub skipped_duplicates: usize,
    /// Existing conversations that received new messages.
    pub updated_count: usize,
    /// Conversations that failed to import.
    pub failed_count: usize,
    /// Messages appended across all updated conversations.
    pub messages_added: usize,
    /// Detected format tag, or "unknown".
    pub format_detected: String,
    pub notes: Vec<String>,
    pub errors: Vec<String>,
}

impl ImportResult {
    pub fn new() -> Self {
        Self {
            format_detected: "unknown".to_owned(),
            ..Default::default()
        }
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    /// True when the file produced something useful - either new data or
    /// confirmation everything was already indexed.
    pub fn is_success(&self) -> bool {
        self.imported_count > 0 || self.updated_count > 0 || self.skipped_duplicates > 0
    }
}

impl fmt::Display for ImportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.imported_count == 0
            && self.updated_count == 0
            && self.failed_count == 0
            && self.skipped_duplicates == 0
        {
            return write!(f, "No conversations to import");
        }

        let mut parts = Vec::new();
        if self.imported_count > 0 {
            parts.push(format!("imported {} conversations", self.imported_count));
        }
        if self.updated_count > 0 {
            parts.push(format!(
                "updated {} ({} messages added)",
                self.updated_count, self.messages_added
            ));
        }
        if self.skipped_duplicates > 0 {
            parts.push(format!("skipped {} duplicates", self.skipped_duplicates));
        }
        if self.failed_count > 0 {
            parts.push(format!("{} failed", self.failed_count));
        }

        write!(f, "{}", parts.join(", "))?;
        if self.format_detected != "unknown" {
            write!(f, " ({} format)", self.format_detected)?;
        }
        Ok(())
    }
}
