use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;

use super::error::GatewayError;
use super::models;
use super::provider::{ModelProvider, TextStream};
use super::tokens::estimate_tokens;
use super::types::{GenerationRequest, GenerationResponse, TokenUsage};

pub const STREAM_BUFFER: usize = 32;

/// Only HTTPS, or plain HTTP for loopback hosts.
pub fn validate_base_url(base_url: &str) -> Result<(), GatewayError> {
    let parsed = reqwest::Url::parse(base_url).map_err(|e| {
        GatewayError::Configuration(format!("Invalid base URL '{}': {}", base_url, e))
    })?;

    let host = parsed.host_str().unwrap_or("");
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                tracing::warn!(
                    "Using unencrypted HTTP for model API at '{}'. API key will be sent in cleartext.",
                    base_url
                );
                Ok(())
            } else {
                Err(GatewayError::Configuration(format!(
                    "HTTP is only allowed for localhost (base URL: '{}'). Use HTTPS.",
                    base_url
                )))
            }
        }
        scheme => Err(GatewayError::Configuration(format!(
            "Unsupported URL scheme '{}' in base URL '{}'",
            scheme, base_url
        ))),
    }
}

/// OpenAI-compatible chat completions provider.
#[derive(Clone)]
pub struct CloudProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CloudProvider {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, GatewayError> {
        validate_base_url(base_url)?;
        if api_key.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "API key is required for the cloud provider".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_completion(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let config = models::lookup(&request.model);
        let body = config.request_body(request, stream);
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(
            "POST {} (model {}, stream {})",
            url,
            config.api_model,
            stream
        );

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
            tracing::error!("Chat completion failed ({}): {}", status, text);
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(res)
    }
}

#[async_trait]
impl ModelProvider for CloudProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GatewayError> {
        let res = self.post_completion(request, false).await?;
        let payload: Value = res
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        parse_completion(request, &payload)
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, GatewayError> {
        let res = self.post_completion(request, true).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(GatewayError::network(e))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                // Events and multibyte characters can straddle network
                // chunks; only complete lines are decoded.
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = match String::from_utf8(raw) {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!("Skipping stream line with invalid UTF-8: {}", e);
                            continue;
                        }
                    };
                    match parse_sse_line(&line) {
                        SseLine::Delta(content) => {
                            if tx.send(Ok(content)).await.is_err() {
                                tracing::debug!("Stream receiver dropped, cancelling");
                                return;
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn parse_completion(
    request: &GenerationRequest,
    payload: &Value,
) -> Result<GenerationResponse, GatewayError> {
    let choice = payload["choices"]
        .get(0)
        .ok_or_else(|| GatewayError::InvalidResponse("response has no choices".to_string()))?;
    let content = choice["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let finish_reason = choice["finish_reason"].as_str().map(str::to_string);

    let config = models::lookup(&request.model);
    let usage = match payload.get("usage").filter(|u| u.is_object()) {
        Some(usage) => {
            let prompt_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0);
            let completion_tokens = usage["completion_tokens"].as_u64().unwrap_or(0);
            TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: usage["total_tokens"]
                    .as_u64()
                    .unwrap_or(prompt_tokens + completion_tokens),
            }
        }
        None => {
            let prompt_tokens =
                (estimate_tokens(&request.system_prompt) + estimate_tokens(&request.user_prompt))
                    as u64;
            let completion_tokens = estimate_tokens(&content) as u64;
            TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }
        }
    };

    let model = payload["model"]
        .as_str()
        .unwrap_or(config.api_model)
        .to_string();

    Ok(GenerationResponse {
        content,
        finish_reason,
        cost: config.cost(usage.prompt_tokens, usage.completion_tokens),
        usage,
        model,
    })
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseLine::Delta(content.to_string()),
            _ => SseLine::Skip,
        },
        Err(e) => {
            tracing::warn!("Skipping malformed stream event: {}", e);
            SseLine::Skip
        }
    }
}
