use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::GatewayError;
use super::provider::{ModelProvider, TextStream};
use super::tokens::estimate_tokens;
use super::types::{GenerationRequest, GenerationResponse, TokenUsage};

pub const LOCAL_MODEL_NAME: &str = "local-fallback";

/// Offline provider used when no cloud key is configured. Echoes the
/// prompts back so the rest of the pipeline stays observable; costs nothing.
#[derive(Debug, Clone, Default)]
pub struct LocalFallbackProvider;

impl LocalFallbackProvider {
    pub fn placeholder(request: &GenerationRequest) -> String {
        format!(
            "[Local fallback: no API key configured]\n\nSystem prompt:\n{}\n\nUser prompt:\n{}",
            request.system_prompt, request.user_prompt
        )
    }
}

#[async_trait]
impl ModelProvider for LocalFallbackProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GatewayError> {
        let content = Self::placeholder(request);
        let prompt_tokens =
            (estimate_tokens(&request.system_prompt) + estimate_tokens(&request.user_prompt)) as u64;
        let completion_tokens = estimate_tokens(&content) as u64;

        Ok(GenerationResponse {
            content,
            finish_reason: Some("stop".to_string()),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: LOCAL_MODEL_NAME.to_string(),
            cost: 0.0,
        })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, GatewayError> {
        let content = Self::placeholder(request);
        let (tx, rx) = mpsc::channel(super::cloud::STREAM_BUFFER);

        tokio::spawn(async move {
            for word in content.split_inclusive(' ') {
                if tx.send(Ok(word.to_string())).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
