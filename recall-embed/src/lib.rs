//! recall-embed - embedding and transcript oracles
//!
//! The archive treats embedding as an external contract: `text -> vector(d)`.
//! This crate holds the trait, an HTTP client speaking the OpenAI-compatible
//! `/v1/embeddings` wire shape (works against local inference servers), and
//! a deterministic hash-based embedder for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

mod http;
mod transcript;

pub use http::HttpEmbedder;
pub use transcript::{Transcript, TranscriptOracle};

/// Default embedding dimension; must match the `vector(384)` column.
pub const EMBEDDING_DIM: usize = 384;

/// Default model tag recorded alongside embeddings and in job payloads.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding oracle: pure `text -> vector(d)`.
///
/// Failures are transient from the caller's perspective; workers retry them
/// with backoff.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Vector dimension this oracle produces.
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Model identifier stored with each embedding.
    fn model(&self) -> &str {
        DEFAULT_MODEL
    }
}

/// Deterministic embedder for tests: hashes character trigrams into a fixed
/// number of buckets and L2-normalizes. Similar texts land near each other,
/// identical texts are identical, and no model download is needed.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let mut vector = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        if chars.is_empty() {
            return vector;
        }
        for window in chars.windows(3.min(chars.len())) {
            let gram: String = window.iter().collect();
            let digest = Sha256::digest(gram.as_bytes());
            let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dim;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(anyhow!("cannot embed empty text"));
        }
        Ok(self.embed_sync(text))
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model(&self) -> &str {
        "hash-trigram-test"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("vector search in postgres").await.unwrap();
        let b = embedder.embed("vector search in postgres").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn hash_embedder_is_normalized() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("hello world").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_are_closer_than_unrelated() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("postgresql vector search").await.unwrap();
        let b = embedder.embed("vector search postgresql").await.unwrap();
        let c = embedder.embed("unrelated lunch plans").await.unwrap();

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[tokio::test]
    async fn empty_text_is_an_error() {
        let embedder = HashEmbedder::default();
        assert!(embedder.embed("").await.is_err());
    }
}
