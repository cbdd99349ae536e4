use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Message author role. The archive persists only these three; anything an
/// export calls "human"/"tool"/etc is mapped at extraction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    /// Parse a role from a stored column value.
    pub fn parse(value: &str) -> Result<MessageRole> {
        match value {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(CoreError::UnknownRole(other.to_owned())),
        }
    }

    /// Map the role field of an export payload, tolerating the aliases the
    /// supported formats use ("human", "sender": "assistant", tool roles).
    pub fn from_export_value(value: &Value) -> MessageRole {
        value
            .as_str()
            .map(|s| match s {
                "assistant" | "model" => MessageRole::Assistant,
                "system" | "tool" | "function" => MessageRole::System,
                _ => MessageRole::User,
            })
            .unwrap_or(MessageRole::User)
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attachment normalized to a uniform shape regardless of source format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A single message as produced by a format extractor, before persistence.
///
/// `sequence` is the extractor-assigned file-order index; it survives into
/// `messages.metadata.sequence` and breaks ordering ties when timestamps
/// collide.
#[derive(Debug, Clone)]
pub struct ExtractedMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub sequence: i64,
    pub metadata: Option<Value>,
    pub attachments: Vec<Attachment>,
}

impl ExtractedMessage {
    pub fn new(role: MessageRole, content: impl Into<String>, sequence: i64) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: None,
            sequence,
            metadata: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_created_at(mut self, created_at: Option<DateTime<Utc>>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_round_trips_through_str() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            assert_eq!(MessageRole::parse(role.as_str()).unwrap(), role);
        }
        assert!(MessageRole::parse("robot").is_err());
    }

    #[test]
    fn export_role_aliases() {
        assert_eq!(
            MessageRole::from_export_value(&json!("human")),
            MessageRole::User
        );
        assert_eq!(
            MessageRole::from_export_value(&json!("assistant")),
            MessageRole::Assistant
        );
        assert_eq!(
            MessageRole::from_export_value(&json!("tool")),
            MessageRole::System
        );
        assert_eq!(MessageRole::from_export_value(&json!(null)), MessageRole::User);
    }

    #[test]
    fn attachment_serializes_with_type_key() {
        let att = Attachment {
            file_name: "notes.txt".into(),
            kind: "text/plain".into(),
            available: true,
            extracted_content: None,
            metadata: None,
        };
        let value = serde_json::to_value(&att).unwrap();
        assert_eq!(value["type"], "text/plain");
        assert!(value.get("extracted_content").is_none());
    }
}
