//! Export-format registry.
//!
//! Each supported format is a variant of the closed [`Format`] union with a
//! detector (schema-shape signals only, never content heuristics), an
//! extractor producing normalized [`ExtractedMessage`]s, and capability
//! flags. Adding a format means adding a variant and its entry in
//! [`REGISTRY`]; the import service is format-agnostic beyond that.

use recall_core::ExtractedMessage;
use serde_json::Value;

use crate::error::ImportError;

pub mod chatgpt;
pub mod claude;
pub mod openwebui;
pub mod youtube;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    ChatGpt,
    Claude,
    OpenWebUi,
    YouTube,
}

/// Detection order matters only for pathological payloads carrying multiple
/// signals; first match wins.
pub const REGISTRY: &[Format] = &[
    Format::ChatGpt,
    Format::Claude,
    Format::OpenWebUi,
    Format::YouTube,
];

impl Format {
    /// Registry key, also persisted as `conversations.source_type`.
    pub fn key(&self) -> &'static str {
        match self {
            Format::ChatGpt => "chatgpt",
            Format::Claude => "claude",
            Format::OpenWebUi => "openwebui",
            Format::YouTube => "youtube",
        }
    }

    /// Human-facing name used in detection notes and error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Format::ChatGpt => "ChatGPT",
            Format::Claude => "Claude",
            Format::OpenWebUi => "OpenWebUI",
            Format::YouTube => "YouTube",
        }
    }

    /// Does one conversation-level value belong to this format?
    ///
    /// Shape signals: ChatGPT exports carry a `mapping` node graph, Claude a
    /// `chat_messages` array, OpenWebUI nests `chat.history.messages`, and
    /// YouTube watch events carry `titleUrl`.
    pub fn matches(&self, conv: &Value) -> bool {
        match self {
            Format::ChatGpt => conv.get("mapping").is_some_and(Value::is_object),
            Format::Claude => conv.get("chat_messages").is_some_and(Value::is_array),
            Format::OpenWebUi => conv
                .get("chat")
                .and_then(|c| c.get("history"))
                .and_then(|h| h.get("messages"))
                .is_some_and(Value::is_object),
            Format::YouTube => conv.get("titleUrl").is_some_and(Value::is_string),
        }
    }

    /// Extract the ordered messages of one conversation-level value.
    pub fn extract(&self, conv: &Value) -> Result<Vec<ExtractedMessage>, ImportError> {
        match self {
            Format::ChatGpt => chatgpt::extract(conv),
            Format::Claude => claude::extract(conv),
            Format::OpenWebUi => openwebui::extract(conv),
            Format::YouTube => youtube::extract_event(conv).map(|m| m.into_iter().collect()),
        }
    }

    /// Capability gate consulted before the extractor runs.
    pub fn requires_license(&self) -> bool {
        matches!(self, Format::ChatGpt)
    }

    /// Feature name the capability oracle is asked about.
    pub fn license_feature(&self) -> Option<&'static str> {
        match self {
            Format::ChatGpt => Some("chatgpt_importer"),
            _ => None,
        }
    }
}

/// Names of every registered format, for error messages.
pub fn registered_formats() -> Vec<String> {
    REGISTRY.iter().map(|f| f.key().to_owned()).collect()
}

/// Detect the format of an import payload.
///
/// Accepts a bare conversation array or a wrapper object with a
/// `conversations` array; returns the conversation-level values plus the
/// matched format, or `None` when no registered detector fires.
pub fn detect_format(data: &Value) -> Option<(Vec<Value>, Format)> {
    let candidates: Vec<Value> = if let Some(array) = data.as_array() {
        array.clone()
    } else if let Some(array) = data.get("conversations").and_then(Value::as_array) {
        array.clone()
    } else if data.is_object() {
        // A single conversation object outside any wrapper.
        vec![data.clone()]
    } else {
        return None;
    };

    let probe = candidates.iter().find(|v| v.is_object())?;
    let format = REGISTRY.iter().find(|f| f.matches(probe))?;
    Some((candidates, *format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_chatgpt_by_mapping() {
        let data = json!([{ "title": "t", "mapping": {} }]);
        let (convs, format) = detect_format(&data).unwrap();
        assert_eq!(format, Format::ChatGpt);
        assert_eq!(convs.len(), 1);
    }

    #[test]
    fn detects_claude_by_chat_messages() {
        let data = json!([{ "uuid": "abc", "chat_messages": [] }]);
        let (_, format) = detect_format(&data).unwrap();
        assert_eq!(format, Format::Claude);
    }

    #[test]
    fn detects_openwebui_by_nested_history() {
        let data = json!([{ "chat": { "history": { "messages": {} } } }]);
        let (_, format) = detect_format(&data).unwrap();
        assert_eq!(format, Format::OpenWebUi);
    }

    #[test]
    fn detects_youtube_by_title_url() {
        let data = json!([{ "title": "Watched a video", "titleUrl": "https://www.youtube.com/watch?v=x" }]);
        let (_, format) = detect_format(&data).unwrap();
        assert_eq!(format, Format::YouTube);
    }

    #[test]
    fn unwraps_conversations_key() {
        let data = json!({ "conversations": [{ "chat_messages": [] }] });
        let (convs, format) = detect_format(&data).unwrap();
        assert_eq!(format, Format::Claude);
        assert_eq!(convs.len(), 1);
    }

    #[test]
    fn single_conversation_object_is_accepted() {
        let data = json!({ "mapping": {}, "title": "solo" });
        let (convs, format) = detect_format(&data).unwrap();
        assert_eq!(format, Format::ChatGpt);
        assert_eq!(convs.len(), 1);
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        assert!(detect_format(&json!([{ "foo": "bar" }])).is_none());
        assert!(detect_format(&json!("just a string")).is_none());
        assert!(detect_format(&json!([])).is_none());
    }

    #[test]
    fn only_chatgpt_requires_license() {
        for format in REGISTRY {
            assert_eq!(
                format.requires_license(),
                matches!(format, Format::ChatGpt),
                "unexpected capability for {:?}",
                format
            );
        }
    }
}
