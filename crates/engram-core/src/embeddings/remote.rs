//! Remote embeddings over HTTP
//!
//! Talks to an OpenAI-shaped `/embeddings` endpoint: POST with
//! `{model, input: [...]}`, bearer auth, JSON response carrying one vector
//! per input. Vectors are truncated and normalized to the configured
//! dimension so local and remote providers are interchangeable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{truncate_normalize, EmbeddingError, EmbeddingProvider, Result};

/// Model requested when EMBEDDING_MODEL_NAME is unset
pub const DEFAULT_REMOTE_MODEL: &str = "text-embedding-3-small";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Remote embedding provider
pub struct RemoteEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl RemoteEmbedder {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        dimensions: usize,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::Unavailable(format!("http client: {}", e)))?;

        let endpoint = if base_url.ends_with("/embeddings") {
            base_url
        } else {
            format!("{}/embeddings", base_url.trim_end_matches('/'))
        };

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            dimensions,
        })
    }

    fn request(&self, input: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let expected = input.len();
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| EmbeddingError::Unavailable(format!("{}: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            let message = format!("{} returned {}: {}", self.endpoint, status, detail);
            // 5xx and 429 are transient; everything else is a hard failure
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(EmbeddingError::Unavailable(message))
            } else {
                Err(EmbeddingError::Failed(message))
            };
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbeddingError::Failed(format!("bad response body: {}", e)))?;

        if parsed.data.len() != expected {
            return Err(EmbeddingError::Failed(format!(
                "expected {} embeddings, got {}",
                expected,
                parsed.data.len()
            )));
        }

        Ok(parsed
            .data
            .into_iter()
            .map(|d| truncate_normalize(d.embedding, self.dimensions))
            .collect())
    }
}

impl EmbeddingProvider for RemoteEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".to_string()));
        }
        let mut vectors = self.request(vec![text])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Failed("no embedding in response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.request(texts.to_vec())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_normalization() {
        let a = RemoteEmbedder::new(
            "https://api.example.com/v1".to_string(),
            None,
            DEFAULT_REMOTE_MODEL.to_string(),
            256,
        )
        .unwrap();
        assert_eq!(a.endpoint, "https://api.example.com/v1/embeddings");

        let b = RemoteEmbedder::new(
            "https://api.example.com/v1/embeddings".to_string(),
            None,
            DEFAULT_REMOTE_MODEL.to_string(),
            256,
        )
        .unwrap();
        assert_eq!(b.endpoint, "https://api.example.com/v1/embeddings");
    }

    #[test]
    fn empty_input_rejected() {
        let embedder = RemoteEmbedder::new(
            "http://127.0.0.1:1/v1".to_string(),
            None,
            DEFAULT_REMOTE_MODEL.to_string(),
            256,
        )
        .unwrap();
        assert!(matches!(
            embedder.embed(""),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
