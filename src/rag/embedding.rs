//! Chunk embeddings.
//!
//! With a cloud key configured, vectors come from the provider's embeddings
//! endpoint. Without one, `LocalEmbedder` produces a character-frequency
//! fingerprint: identical text always maps to the identical vector, but the
//! vector carries no meaning beyond that. Vectors already stored are not
//! recomputed when the embedder changes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::llm::error::GatewayError;

pub const LOCAL_EMBEDDING_DIM: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the vector space the embedder produces.
    fn name(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, GatewayError>;
}

#[derive(Debug, Clone, Default)]
pub struct LocalEmbedder;

#[async_trait]
impl Embedder for LocalEmbedder {
    fn name(&self) -> &str {
        "local-char-hash"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        Ok(inputs.iter().map(|text| char_frequency_embedding(text)).collect())
    }
}

/// Bucket every character by `code point % 384`, then L2-normalize.
pub fn char_frequency_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; LOCAL_EMBEDDING_DIM];
    for c in text.chars() {
        vector[(c as usize) % LOCAL_EMBEDDING_DIM] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

#[derive(Clone)]
pub struct CloudEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl CloudEmbedder {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Embedder for CloudEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::network)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            tracing::error!("Embedding request failed ({}): {}", status, text);
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let embeddings: Vec<Vec<f32>> = payload["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .filter_map(|item| item["embedding"].as_array())
                    .map(|vals| {
                        vals.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        if embeddings.len() != inputs.len() {
            return Err(GatewayError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}
