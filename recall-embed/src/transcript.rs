use anyhow::Result;
use async_trait::async_trait;

/// A fetched video transcript.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    pub is_generated: bool,
    /// Total duration in seconds, when the provider reports it.
    pub duration: f64,
}

/// Transcript oracle consumed by transcription jobs. Implementations wrap
/// whatever provider is available; `None`-style absence is modeled by simply
/// not running the transcription worker.
#[async_trait]
pub trait TranscriptOracle: Send + Sync {
    async fn fetch_transcript(&self, video_id: &str, languages: &[String]) -> Result<Transcript>;
}
