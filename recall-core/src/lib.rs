//! recall-core - domain types shared across the archive
//!
//! Holds the pieces every other crate agrees on: message roles, the
//! normalized shape extractors produce, attachment normalization, UTC
//! timestamp inference for heterogeneous export formats, and the content
//! hashes used for duplicate detection.

pub mod error;
pub mod hash;
pub mod model;
pub mod timestamp;

pub use error::{CoreError, Result};
pub use hash::{conversation_content_hash, message_fingerprint};
pub use model::{Attachment, ExtractedMessage, MessageRole};
pub use timestamp::normalize_timestamp;
