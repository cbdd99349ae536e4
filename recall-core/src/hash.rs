use sha2::{Digest, Sha256};

/// Hash the full content of a conversation for duplicate detection.
///
/// SHA-256 over all non-empty message contents joined with "\n\n". Stable
/// under re-import as long as content is unchanged.
pub fn conversation_content_hash<'a, I>(contents: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let joined: Vec<&str> = contents
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(joined.join("\n\n").as_bytes());
    hex_encode(&hasher.finalize())
}

/// Short fingerprint of a single message, used to detect already-imported
/// messages when appending to an existing conversation. First 16 hex chars
/// of SHA-256 over "role:content".
pub fn message_fingerprint(role: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(role.as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    let digest = hex_encode(&hasher.finalize());
    digest[..16].to_owned()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
