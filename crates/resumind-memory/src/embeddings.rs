use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use resumind_core::config::EmbeddingConfig;

/// Trait for embedding providers (OpenAI-compatible APIs).
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embed a batch of texts into vectors, one per input, in input order.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>, String>>;
    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// HTTP-based embedding provider compatible with OpenAI, Ollama, etc.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
            model: model.to_string(),
            dims,
        }
    }

    /// Build a provider from the `[embedding]` config section.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(&config.provider).to_string());
        Self::new(
            &base_url,
            config.api_key.as_deref(),
            &config.model,
            config.dimensions,
        )
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "ollama" => "http://localhost:11434/v1",
        "gemini" | "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
        _ => "https://api.openai.com/v1",
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>, String>> {
        let texts = texts.to_vec();
        Box::pin(async move {
            let url = format!("{}/embeddings", self.base_url);
            let expected = texts.len();

            let mut req = self.client.post(&url).json(&EmbeddingRequest {
                model: self.model.clone(),
                input: texts,
            });

            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| format!("Embedding request failed: {}", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(format!("Embedding API error {}: {}", status, body));
            }

            let body: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| format!("Failed to parse embedding response: {}", e))?;

            let mut data = body.data;
            // Some servers return batch items out of order.
            data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
            if data.len() != expected {
                return Err(format!(
                    "Embedding API returned {} vectors for {} inputs",
                    data.len(),
                    expected
                ));
            }

            Ok(data.into_iter().map(|d| d.embedding).collect())
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Cosine similarity in `[-1, 1]`. Returns 0 when lengths differ or a norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let denom = aa.sqrt() * bb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Encode a vector as little-endian f32 bytes for BLOB storage.
pub(crate) fn to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_blob_encoding() {
        let v = vec![0.25f32, -1.5, 3.0];
        let blob = to_blob(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(from_blob(&blob), v);
    }

    #[test]
    fn test_from_config_uses_provider_default_url() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: "nomic-embed-text".into(),
            base_url: None,
            api_key: None,
            dimensions: 768,
        };
        let provider = HttpEmbeddingProvider::from_config(&config);
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
        assert_eq!(provider.dimensions(), 768);
    }
}
