use std::sync::Arc;

use crate::core::config::{GatewayConfig, Settings};
use crate::core::config::settings::{PROVIDER_LOCAL, PROVIDER_OPENAI};
use crate::rag::{CloudEmbedder, Embedder, LocalEmbedder};

use super::cloud::CloudProvider;
use super::error::GatewayError;
use super::local::LocalFallbackProvider;
use super::provider::{ModelProvider, TextStream};
use super::types::{GenerationRequest, GenerationResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The inputs that decide which provider backs the gateway. A change in any
/// of them requires a new gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelection {
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: String,
}

impl ProviderSelection {
    /// Stored settings take precedence over the config file.
    pub fn resolve(settings: &Settings, config: &GatewayConfig) -> Result<Self, GatewayError> {
        if settings.provider != PROVIDER_OPENAI && settings.provider != PROVIDER_LOCAL {
            return Err(GatewayError::Configuration(format!(
                "Unsupported provider '{}'",
                settings.provider
            )));
        }

        let api_key = settings
            .api_key()
            .map(str::to_string)
            .or_else(|| config.api_key.clone());
        let base_url = settings
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .or_else(|| config.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            provider: settings.provider.clone(),
            api_key,
            base_url,
        })
    }
}

pub struct ModelGateway {
    selection: ProviderSelection,
    provider: Arc<dyn ModelProvider>,
    embedder: Arc<dyn Embedder>,
}

impl ModelGateway {
    pub fn from_settings(settings: &Settings, config: &GatewayConfig) -> Result<Self, GatewayError> {
        let selection = ProviderSelection::resolve(settings, config)?;

        let cloud_key = match (selection.provider.as_str(), selection.api_key.as_deref()) {
            (PROVIDER_OPENAI, Some(key)) => Some(key.to_string()),
            (PROVIDER_OPENAI, None) => {
                tracing::warn!("No API key configured for provider 'openai'; using local fallback");
                None
            }
            _ => None,
        };

        let (provider, embedder): (Arc<dyn ModelProvider>, Arc<dyn Embedder>) = match cloud_key {
            Some(key) => (
                Arc::new(CloudProvider::new(
                    &selection.base_url,
                    key.clone(),
                    config.request_timeout,
                )?),
                Arc::new(CloudEmbedder::new(
                    &selection.base_url,
                    key,
                    config.embedding_model.clone(),
                    config.request_timeout,
                )?),
            ),
            None => (Arc::new(LocalFallbackProvider), Arc::new(LocalEmbedder)),
        };

        tracing::info!(
            "Model gateway ready (provider: {}, backend: {})",
            selection.provider,
            provider.name()
        );

        Ok(Self {
            selection,
            provider,
            embedder,
        })
    }

    pub fn with_provider(
        selection: ProviderSelection,
        provider: Arc<dyn ModelProvider>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            selection,
            provider,
            embedder,
        }
    }

    pub fn selection(&self) -> &ProviderSelection {
        &self.selection
    }

    /// Name of the provider actually serving requests.
    pub fn backend(&self) -> &str {
        self.provider.name()
    }

    pub fn is_local_fallback(&self) -> bool {
        self.provider.name() == PROVIDER_LOCAL
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GatewayError> {
        let response = self.provider.generate(request).await?;
        tracing::info!(
            "Generated reply with {} (tokens: {}, cost: ${:.6})",
            response.model,
            response.usage.total_tokens,
            response.cost
        );
        Ok(response)
    }

    pub async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, GatewayError> {
        self.provider.stream(request).await
    }
}
