//! YouTube watch-history extractor.
//!
//! A Takeout watch history is an array of watch events, not conversations;
//! each event becomes one user message in a single synthetic conversation.
//! The video id is pulled out of `titleUrl` so transcription jobs can be
//! enqueued later.

use recall_core::{normalize_timestamp, ExtractedMessage, MessageRole};
use serde_json::Value;

use crate::error::ImportError;

/// Extract one watch event into at most one message.
pub fn extract_event(event: &Value) -> Result<Option<ExtractedMessage>, ImportError> {
    let Some(title_url) = event.get("titleUrl").and_then(Value::as_str) else {
        return Ok(None);
    };
    let title = event
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Unknown video");
    let title = title.strip_prefix("Watched ").unwrap_or(title);

    let channel = event
        .get("subtitles")
        .and_then(Value::as_array)
        .and_then(|subs| subs.first())
        .and_then(|sub| sub.get("name"))
        .and_then(Value::as_str);

    let mut content = format!("Watched: {title}");
    if let Some(channel) = channel {
        content.push_str(&format!("\nChannel: {channel}"));
    }
    content.push_str(&format!("\nURL: {title_url}"));

    let created_at = event.get("time").and_then(|v| normalize_timestamp(v));

    let mut metadata = serde_json::json!({
        "video_url": title_url,
        "video_title": title,
    });
    if let Some(channel) = channel {
        metadata["channel"] = Value::String(channel.to_owned());
    }
    if let Some(video_id) = parse_video_id(title_url) {
        metadata["video_id"] = Value::String(video_id);
    }

    let mut message =
        ExtractedMessage::new(MessageRole::User, content, 0).with_created_at(created_at);
    message.metadata = Some(metadata);
    Ok(Some(message))
}

/// Extract a whole watch history, assigning sequences in file order.
pub fn extract_watch_history(events: &[Value]) -> Result<Vec<ExtractedMessage>, ImportError> {
    let mut messages = Vec::new();
    for (idx, event) in events.iter().enumerate() {
        if let Some(mut message) = extract_event(event)? {
            message.sequence = idx as i64;
            messages.push(message);
        }
    }
    Ok(messages)
}

/// Parse the video id from watch URLs (`watch?v=`, `youtu.be/`, `shorts/`).
pub fn parse_video_id(url: &str) -> Option<String> {
    if let Some(rest) = url.split("watch?v=").nth(1) {
        return Some(trim_id(rest));
    }
    if let Some(rest) = url.split("youtu.be/").nth(1) {
        return Some(trim_id(rest));
    }
    if let Some(rest) = url.split("/shorts/").nth(1) {
        return Some(trim_id(rest));
    }
    None
}

fn trim_id(rest: &str) -> String {
    rest.split(['&', '?', '/'])
        .next()
        .unwrap_or(rest)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(title: &str, url: &str, time: &str) -> Value {
        json!({
            "header": "YouTube",
            "title": title,
            "titleUrl": url,
            "subtitles": [{ "name": "Some Channel" }],
            "time": time,
        })
    }

    #[test]
    fn event_becomes_user_message_with_video_metadata() {
        let message = extract_event(&event(
            "Watched Rust in 100 seconds",
            "https://www.youtube.com/watch?v=abc123XYZ_-",
            "2024-03-01T18:00:00Z",
        ))
        .unwrap()
        .unwrap();

        assert_eq!(message.role, MessageRole::User);
        assert!(message.content.starts_with("Watched: Rust in 100 seconds"));
        assert!(message.content.contains("Channel: Some Channel"));
        let meta = message.metadata.unwrap();
        assert_eq!(meta["video_id"], "abc123XYZ_-");
        assert_eq!(meta["channel"], "Some Channel");
        assert!(message.created_at.is_some());
    }

    #[test]
    fn events_without_url_are_skipped() {
        let ad = json!({ "header": "YouTube", "title": "Watched an ad" });
        assert!(extract_event(&ad).unwrap().is_none());
    }

    #[test]
    fn watch_history_assigns_file_order_sequences() {
        let events = vec![
            event("Watched one", "https://www.youtube.com/watch?v=one", "2024-03-01T18:00:00Z"),
            json!({ "title": "no url" }),
            event("Watched two", "https://youtu.be/two", "2024-03-02T18:00:00Z"),
        ];

        let messages = extract_watch_history(&events).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sequence, 0);
        assert_eq!(messages[1].sequence, 2);
    }

    #[test]
    fn video_id_parsing_handles_url_shapes() {
        assert_eq!(
            parse_video_id("https://www.youtube.com/watch?v=abc&t=30s").as_deref(),
            Some("abc")
        );
        assert_eq!(parse_video_id("https://youtu.be/xyz?si=1").as_deref(), Some("xyz"));
        assert_eq!(
            parse_video_id("https://www.youtube.com/shorts/sss").as_deref(),
            Some("sss")
        );
        assert_eq!(parse_video_id("https://example.com/video"), None);
    }
}
