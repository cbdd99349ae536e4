//! OpenWebUI export extractor.
//!
//! OpenWebUI stores messages as a map under `chat.history.messages` linked
//! by `parentId`, with `currentId` pointing at the leaf of the active
//! branch. The extractor follows the parent chain backwards from the leaf
//! and reverses it; when the chain is broken it falls back to timestamp
//! order so a damaged export still imports.

use recall_core::{normalize_timestamp, ExtractedMessage, MessageRole};
use serde_json::{Map, Value};

use crate::error::ImportError;

pub fn extract(conv: &Value) -> Result<Vec<ExtractedMessage>, ImportError> {
    let history = conv
        .get("chat")
        .and_then(|c| c.get("history"))
        .ok_or_else(|| ImportError::extraction("OpenWebUI", "missing chat.history"))?;
    let message_map = history
        .get("messages")
        .and_then(Value::as_object)
        .ok_or_else(|| ImportError::extraction("OpenWebUI", "missing chat.history.messages"))?;

    let ordered = match history.get("currentId").and_then(Value::as_str) {
        Some(current_id) => walk_parent_chain(message_map, current_id),
        None => Vec::new(),
    };
    let ordered = if ordered.is_empty() {
        fallback_timestamp_order(message_map)
    } else {
        ordered
    };

    let mut messages = Vec::new();
    for (idx, raw) in ordered.into_iter().enumerate() {
        let content = raw.get("content").and_then(Value::as_str).unwrap_or("");
        if content.trim().is_empty() {
            continue;
        }
        let role = MessageRole::from_export_value(raw.get("role").unwrap_or(&Value::Null));
        let created_at = raw
            .get("timestamp")
            .and_then(|v| normalize_timestamp(v));

        let mut message =
            ExtractedMessage::new(role, content, idx as i64).with_created_at(created_at);
        if let Some(model) = raw.get("model").and_then(Value::as_str) {
            message.metadata = Some(serde_json::json!({ "model": model }));
        }
        messages.push(message);
    }

    Ok(messages)
}

fn walk_parent_chain<'a>(messages: &'a Map<String, Value>, leaf_id: &str) -> Vec<&'a Value> {
    let mut chain = Vec::new();
    let mut cursor = messages.get(leaf_id);
    let mut guard = 0usize;

    while let Some(node) = cursor {
        chain.push(node);
        guard += 1;
        if guard > messages.len() {
            // Cycle in parent links; abandon and let the fallback handle it.
            return Vec::new();
        }
        cursor = node
            .get("parentId")
            .and_then(Value::as_str)
            .and_then(|id| messages.get(id));
    }

    chain.reverse();
    chain
}

fn fallback_timestamp_order(messages: &Map<String, Value>) -> Vec<&Value> {
    let mut ordered: Vec<&Value> = messages.values().collect();
    ordered.sort_by_key(|m| m.get("timestamp").and_then(Value::as_i64).unwrap_or(0));
    ordered
}
