//! ChatGPT export extractor.
//!
//! ChatGPT exports store each conversation as a `mapping` of node id to
//! `{message, parent, children}`. The display order is the path from the
//! root node down the `children` links, not the map's key order, so the
//! extractor walks the graph and assigns sequences along the way.

use recall_core::{normalize_timestamp, Attachment, ExtractedMessage, MessageRole};
use serde_json::Value;

use crate::error::ImportError;

pub fn extract(conv: &Value) -> Result<Vec<ExtractedMessage>, ImportError> {
    let mapping = conv
        .get("mapping")
        .and_then(Value::as_object)
        .ok_or_else(|| ImportError::extraction("ChatGPT", "missing mapping object"))?;

    // Roots have no parent (or a parent that is not in the mapping).
    let mut roots: Vec<&str> = mapping
        .iter()
        .filter(|(_, node)| {
            node.get("parent")
                .and_then(Value::as_str)
                .map_or(true, |p| !mapping.contains_key(p))
        })
        .map(|(id, _)| id.as_str())
        .collect();
    roots.sort_unstable();

    let mut messages = Vec::new();
    let mut sequence = 0i64;
    let mut stack: Vec<&str> = roots.into_iter().rev().collect();
    let mut visited = std::collections::HashSet::new();

    while let Some(node_id) = stack.pop() {
        if !visited.insert(node_id) {
            continue;
        }
        let Some(node) = mapping.get(node_id) else {
            continue;
        };

        if let Some(message) = node.get("message").filter(|m| !m.is_null()) {
            if let Some(extracted) = extract_node_message(message, sequence) {
                messages.push(extracted);
                sequence += 1;
            }
        }

        if let Some(children) = node.get("children").and_then(Value::as_array) {
            for child in children.iter().rev() {
                if let Some(id) = child.as_str() {
                    stack.push(id);
                }
            }
        }
    }

    Ok(messages)
}

fn extract_node_message(message: &Value, sequence: i64) -> Option<ExtractedMessage> {
    let role = MessageRole::from_export_value(
        message
            .get("author")
            .and_then(|a| a.get("role"))
            .unwrap_or(&Value::Null),
    );

    let content = extract_content(message.get("content")?)?;
    if content.trim().is_empty() {
        return None;
    }

    let created_at = message
        .get("create_time")
        .and_then(|v| normalize_timestamp(v));

    let mut extracted = ExtractedMessage::new(role, content, sequence).with_created_at(created_at);
    extracted.attachments = extract_attachments(message);
    Some(extracted)
}

fn extract_content(content: &Value) -> Option<String> {
    // Standard text content: {"content_type": "text", "parts": [...]}
    if let Some(parts) = content.get("parts").and_then(Value::as_array) {
        let joined: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
        if !joined.is_empty() {
            return Some(joined.join("\n"));
        }
    }
    // Some node types carry a bare "text" field instead.
    if let Some(text) = content.get("text").and_then(Value::as_str) {
        return Some(text.to_owned());
    }
    None
}

fn extract_attachments(message: &Value) -> Vec<Attachment> {
    message
        .get("metadata")
        .and_then(|m| m.get("attachments"))
        .and_then(Value::as_array)
        .map(|attachments| {
            attachments
                .iter()
                .filter_map(|att| {
                    let name = att.get("name").and_then(Value::as_str)?;
                    Some(Attachment {
                        file_name: name.to_owned(),
                        kind: att
                            .get("mimeType")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_owned(),
                        // Export zips do not include attachment bodies.
                        available: false,
                        extracted_content: None,
                        metadata: att.get("id").map(|id| serde_json::json!({ "id": id })),
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

    fn node(id: &str, parent: Option<&str>, children: &[&str], message: Value) -> (String, Value) {
        (
            id.to_owned(),
            json!({
                "id": id,
                "parent": parent,
                "children": children,
                "message": message,
            }),
        )
    }

    fn text_message(role: &str, text: &str, create_time: f64) -> Value {
        json!({
            "author": { "role": role },
            "content": { "content_type": "text", "parts": [text] },
            "create_time": create_time,
        })
    }

    #[test]
    fn walks_mapping_in_tree_order() {
        let mapping: serde_json::Map<String, Value> = [
            node("root", None, &["a"], Value::Null),
            node("a", Some("root"), &["b"], text_message("user", "Hello", 1.0)),
            node("b", Some("a"), &[], text_message("assistant", "Hi there", 2.0)),
        ]
        .into_iter()
        .collect();
        let conv = json!({ "mapping": mapping });

        let messages = extract(&conv).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].sequence, 0);
        assert_eq!(messages[1].content, "Hi there");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].sequence, 1);
    }

    #[test]
    fn skips_empty_and_null_messages() {
        let mapping: serde_json::Map<String, Value> = [
            node("root", None, &["a"], Value::Null),
            node("a", Some("root"), &["b"], text_message("system", "", 1.0)),
            node("b", Some("a"), &[], text_message("user", "real content", 2.0)),
        ]
        .into_iter()
        .collect();
        let conv = json!({ "mapping": mapping });

        let messages = extract(&conv).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "real content");
        assert_eq!(messages[0].sequence, 0);
    }

    #[test]
    fn joins_multiple_parts() {
        let mapping: serde_json::Map<String, Value> = [node(
            "a",
            None,
            &[],
            json!({
                "author": { "role": "assistant" },
                "content": { "parts": ["first", "second"] },
            }),
        )]
        .into_iter()
        .collect();
        let conv = json!({ "mapping": mapping });

        let messages = extract(&conv).unwrap();
        assert_eq!(messages[0].content, "first\nsecond");
        assert!(messages[0].created_at.is_none());
    }

    #[test]
    fn missing_mapping_is_an_extraction_error() {
        let err = extract(&json!({ "title": "no mapping" })).unwrap_err();
        assert!(err.to_string().contains("ChatGPT"));
    }

    #[test]
    fn epoch_timestamps_are_normalized() {
        let mapping: serde_json::Map<String, Value> =
            [node("a", None, &[], text_message("user", "hi", 1_700_000_000.25))]
                .into_iter()
                .collect();
        let conv = json!({ "mapping": mapping });

        let messages = extract(&conv).unwrap();
        let ts = messages[0].created_at.unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }
}
