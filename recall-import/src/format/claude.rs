//! Claude export extractor.
//!
//! Claude exports keep `chat_messages` in display order already; messages
//! carry a `sender` field, content as either a bare `text` string or an
//! array of typed content blocks, ISO-8601 timestamps, and optional
//! attachments with extracted text.

use recall_core::{normalize_timestamp, Attachment, ExtractedMessage, MessageRole};
use serde_json::Value;

use crate::error::ImportError;

pub fn extract(conv: &Value) -> Result<Vec<ExtractedMessage>, ImportError> {
    let chat_messages = conv
        .get("chat_messages")
        .and_then(Value::as_array)
        .ok_or_else(|| ImportError::extraction("Claude", "missing chat_messages array"))?;

    let mut messages = Vec::new();
    for (idx, raw) in chat_messages.iter().enumerate() {
        let role = MessageRole::from_export_value(raw.get("sender").unwrap_or(&Value::Null));
        let content = extract_text(raw);
        if content.trim().is_empty() {
            continue;
        }

        let created_at = raw
            .get("created_at")
            .and_then(|v| normalize_timestamp(v));

        let mut message =
            ExtractedMessage::new(role, content, idx as i64).with_created_at(created_at);
        message.attachments = extract_attachments(raw);
        messages.push(message);
    }

    Ok(messages)
}

fn extract_text(raw: &Value) -> String {
    if let Some(text) = raw.get("text").and_then(Value::as_str) {
        if !text.is_empty() {
            return text.to_owned();
        }
    }

    // Content-block array: join the text blocks.
    if let Some(blocks) = raw.get("content").and_then(Value::as_array) {
        let mut joined = String::new();
        for block in blocks {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                if !joined.is_empty() {
                    joined.push_str("\n\n");
                }
                joined.push_str(text);
            }
        }
        return joined;
    }

    String::new()
}

fn extract_attachments(raw: &Value) -> Vec<Attachment> {
    raw.get("attachments")
        .and_then(Value::as_array)
        .map(|attachments| {
            attachments
                .iter()
                .filter_map(|att| {
                    let file_name = att.get("file_name").and_then(Value::as_str)?;
                    let extracted = att
                        .get("extracted_content")
                        .and_then(Value::as_str)
                        .map(str::to_owned);
                    Some(Attachment {
                        file_name: file_name.to_owned(),
                        kind: att
                            .get("file_type")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_owned(),
                        available: extracted.is_some(),
                        extracted_content: extracted,
                        metadata: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_in_file_order_with_sequences() {
        let conv = json!({
            "uuid": "c1",
            "chat_messages": [
                { "sender": "human", "text": "Hello", "created_at": "2024-05-01T10:00:00Z" },
                { "sender": "assistant", "text": "Hi there", "created_at": "2024-05-01T10:00:05Z" },
            ]
        });

        let messages = extract(&conv).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].sequence, 0);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].sequence, 1);
    }

    #[test]
    fn joins_content_blocks() {
        let conv = json!({
            "chat_messages": [
                {
                    "sender": "assistant",
                    "content": [
                        { "type": "text", "text": "part one" },
                        { "type": "text", "text": "part two" },
                    ]
                }
            ]
        });

        let messages = extract(&conv).unwrap();
        assert_eq!(messages[0].content, "part one\n\npart two");
    }

    #[test]
    fn normalizes_attachments() {
        let conv = json!({
            "chat_messages": [
                {
                    "sender": "human",
                    "text": "see attached",
                    "attachments": [
                        { "file_name": "doc.pdf", "file_type": "pdf", "extracted_content": "body" },
                        { "file_name": "img.png", "file_type": "png" },
                    ]
                }
            ]
        });

        let messages = extract(&conv).unwrap();
        let attachments = &messages[0].attachments;
        assert_eq!(attachments.len(), 2);
        assert!(attachments[0].available);
        assert_eq!(attachments[0].extracted_content.as_deref(), Some("body"));
        assert!(!attachments[1].available);
    }

    #[test]
    fn empty_messages_are_dropped_but_sequence_tracks_file_order() {
        let conv = json!({
            "chat_messages": [
                { "sender": "human", "text": "" },
                { "sender": "assistant", "text": "kept" },
            ]
        });

        let messages = extract(&conv).unwrap();
        assert_eq!(messages.len(), 1);
        // Sequence reflects position in the file, not position after filtering.
        assert_eq!(messages[0].sequence, 1);
    }

    #[test]
    fn missing_chat_messages_is_an_error() {
        assert!(extract(&json!({ "uuid": "x" })).is_err());
    }
}
