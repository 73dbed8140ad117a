use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

pub const PROVIDER_OPENAI: &str = "openai";
pub const PROVIDER_LOCAL: &str = "local";

/// User-facing settings persisted under the `settings` store key.
///
/// Loaded once at startup and replaced wholesale by `updateSettings`; the
/// router hands this struct to the gateway rather than letting components
/// read storage on their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Token budget per request.
    pub max_tokens: u32,
    /// Per-turn cost (USD) above which the reply is flagged.
    pub cost_warning_threshold: f64,
    pub temperature: Option<f64>,
    pub theme: String,
    pub rag_enabled: bool,
    pub user_name: Option<String>,
    pub selected_template_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: PROVIDER_OPENAI.to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4000,
            cost_warning_threshold: 0.10,
            temperature: None,
            theme: "light".to_string(),
            rag_enabled: true,
            user_name: None,
            selected_template_id: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.provider != PROVIDER_OPENAI && self.provider != PROVIDER_LOCAL {
            return Err(ApiError::Configuration(format!(
                "Unsupported provider '{}'",
                self.provider
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ApiError::BadRequest("Model name cannot be empty".to_string()));
        }
        if self.max_tokens == 0 || self.max_tokens > 200_000 {
            return Err(ApiError::BadRequest(
                "maxTokens must be between 1 and 200000".to_string(),
            ));
        }
        if !self.cost_warning_threshold.is_finite() || self.cost_warning_threshold < 0.0 {
            return Err(ApiError::BadRequest(
                "costWarningThreshold must be a non-negative number".to_string(),
            ));
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ApiError::BadRequest(
                    "temperature must be between 0 and 2".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// API key with blank strings treated as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}
