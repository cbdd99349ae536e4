use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::Embedder;

/// Embedding client for OpenAI-compatible `/v1/embeddings` endpoints.
///
/// Works against hosted APIs and local inference servers alike; the base
/// URL, model, and expected dimension are all configurable.
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dim: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dim: usize,
    ) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(anyhow!("embedding endpoint URL is empty"));
        }
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
            dim,
        })
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: inputs,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await?
            .error_for_status()?
            .json::<EmbeddingResponse>()
            .await?;

        let mut vectors = vec![None; inputs.len()];
        for data in response.data {
            if data.index < vectors.len() {
                vectors[data.index] = Some(data.embedding);
            }
        }

        vectors
            .into_iter()
            .enumerate()
            .map(|(idx, maybe)| {
                let vector =
                    maybe.ok_or_else(|| anyhow!("missing embedding for index {}", idx))?;
                if vector.len() != self.dim {
                    return Err(anyhow!(
                        "embedding dimension mismatch: expected {}, got {}",
                        self.dim,
                        vector.len()
                    ));
                }
                Ok(vector)
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_owned()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no vector returned"))
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model(&self) -> &str {
        &self.model
    }
}
