use std::time::Duration;

use serde_json::Value;

use crate::rag::{ChunkerConfig, ContextBuilderConfig};
use crate::session::SessionLimits;

/// Typed view over the merged `config.yml` + `secrets.yaml` document.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionLimits,
    pub rag: RagConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RagConfig {
    pub chunker: ChunkerConfig,
    pub context: ContextBuilderConfig,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Used when the stored settings carry no base URL.
    pub base_url: Option<String>,
    /// Used when the stored settings carry no API key.
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    pub fn from_value(config: &Value) -> Self {
        let mut app = AppConfig::default();

        if let Some(server) = config.get("server") {
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                app.server.port = port as u16;
            }
            app.server.cors_allowed_origins = server
                .get("cors_allowed_origins")
                .and_then(|v| v.as_array())
                .map(|list| {
                    list.iter()
                        .filter_map(|item| item.as_str())
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(|item| item.to_string())
                        .collect()
                })
                .unwrap_or_default();
        }

        if let Some(session) = config.get("session") {
            if let Some(secs) = session.get("max_age_secs").and_then(|v| v.as_u64()) {
                app.session.max_age = Duration::from_secs(secs);
            }
            if let Some(max) = session.get("max_contexts").and_then(|v| v.as_u64()) {
                app.session.max_contexts = max as usize;
            }
            if let Some(secs) = session.get("cleanup_interval_secs").and_then(|v| v.as_u64()) {
                app.session.cleanup_interval = Duration::from_secs(secs);
            }
        }

        if let Some(rag) = config.get("rag") {
            if let Some(size) = rag.get("chunk_size").and_then(|v| v.as_u64()) {
                app.rag.chunker.chunk_size = size as usize;
            }
            if let Some(top_k) = rag.get("top_k").and_then(|v| v.as_u64()) {
                app.rag.context.top_k = top_k as usize;
            }
            if let Some(threshold) = rag.get("similarity_threshold").and_then(|v| v.as_f64()) {
                app.rag.context.similarity_threshold = threshold;
            }
            if let Some(max_len) = rag.get("max_context_length").and_then(|v| v.as_u64()) {
                app.rag.context.max_context_length = max_len as usize;
            }
        }

        if let Some(gateway) = config.get("gateway") {
            app.gateway.base_url = gateway
                .get("base_url")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string());
            app.gateway.api_key = gateway
                .get("api_key")
                .and_then(|v| v.as_str())
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.to_string());
            if let Some(model) = gateway.get("embedding_model").and_then(|v| v.as_str()) {
                app.gateway.embedding_model = model.to_string();
            }
            if let Some(secs) = gateway.get("request_timeout_secs").and_then(|v| v.as_u64()) {
                app.gateway.request_timeout = Duration::from_secs(secs);
            }
        }

        app
    }
}
