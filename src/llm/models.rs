//! Static per-model configuration and pricing.

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::types::{GenerationRequest, PromptMessage};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Provider-side model identifier.
    pub api_model: &'static str,
    /// Sends `max_completion_tokens` instead of `max_tokens`. These models
    /// also only accept their default temperature.
    pub uses_completion_tokens_param: bool,
    pub default_temperature: f64,
    pub max_tokens: u32,
    /// USD per 1K prompt tokens.
    pub input_price_per_1k: f64,
    /// USD per 1K completion tokens.
    pub output_price_per_1k: f64,
    pub supports_system_message: bool,
}

const fn chat_model(
    api_model: &'static str,
    max_tokens: u32,
    input_price_per_1k: f64,
    output_price_per_1k: f64,
) -> ModelConfig {
    ModelConfig {
        api_model,
        uses_completion_tokens_param: false,
        default_temperature: 0.7,
        max_tokens,
        input_price_per_1k,
        output_price_per_1k,
        supports_system_message: true,
    }
}

const fn reasoning_model(
    api_model: &'static str,
    max_tokens: u32,
    input_price_per_1k: f64,
    output_price_per_1k: f64,
    supports_system_message: bool,
) -> ModelConfig {
    ModelConfig {
        api_model,
        uses_completion_tokens_param: true,
        default_temperature: 1.0,
        max_tokens,
        input_price_per_1k,
        output_price_per_1k,
        supports_system_message,
    }
}

static MODEL_TABLE: [(&str, ModelConfig); 9] = [
    ("gpt-4o-mini", chat_model("gpt-4o-mini", 16_384, 0.000_15, 0.000_6)),
    ("gpt-4o", chat_model("gpt-4o", 16_384, 0.002_5, 0.01)),
    ("gpt-4-turbo", chat_model("gpt-4-turbo", 4_096, 0.01, 0.03)),
    ("gpt-3.5-turbo", chat_model("gpt-3.5-turbo", 4_096, 0.000_5, 0.001_5)),
    ("o1-mini", reasoning_model("o1-mini", 65_536, 0.003, 0.012, false)),
    ("o1-preview", reasoning_model("o1-preview", 32_768, 0.015, 0.06, false)),
    ("o3-mini", reasoning_model("o3-mini", 100_000, 0.001_1, 0.004_4, true)),
    ("gpt-5", reasoning_model("gpt-5", 128_000, 0.001_25, 0.01, true)),
    ("gpt-5-mini", reasoning_model("gpt-5-mini", 128_000, 0.000_25, 0.002, true)),
];

/// Config for `name`, if the model is known.
pub fn find(name: &str) -> Option<&'static ModelConfig> {
    MODEL_TABLE
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, config)| config)
}

/// Config for `name`, falling back to the default model with a warning.
pub fn lookup(name: &str) -> &'static ModelConfig {
    if let Some(config) = find(name) {
        return config;
    }
    tracing::warn!(
        "Unknown model '{}', falling back to '{}' configuration",
        name,
        DEFAULT_MODEL
    );
    &MODEL_TABLE[0].1
}

pub fn supported_models() -> impl Iterator<Item = &'static str> {
    MODEL_TABLE.iter().map(|(name, _)| *name)
}

/// `(prompt/1000)*input + (completion/1000)*output` for `model`.
pub fn estimate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    lookup(model).cost(prompt_tokens, completion_tokens)
}

impl ModelConfig {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input_price_per_1k
            + (completion_tokens as f64 / 1000.0) * self.output_price_per_1k
    }

    pub fn token_limit_field(&self) -> &'static str {
        if self.uses_completion_tokens_param {
            "max_completion_tokens"
        } else {
            "max_tokens"
        }
    }

    pub fn temperature(&self, requested: Option<f64>) -> f64 {
        if self.uses_completion_tokens_param {
            return self.default_temperature;
        }
        requested.unwrap_or(self.default_temperature)
    }

    /// Message list for this model; without system-message support the
    /// system prompt is folded into the user turn.
    pub fn messages(&self, system_prompt: &str, user_prompt: &str) -> Vec<PromptMessage> {
        if system_prompt.trim().is_empty() {
            return vec![PromptMessage::user(user_prompt)];
        }
        if self.supports_system_message {
            vec![
                PromptMessage::system(system_prompt),
                PromptMessage::user(user_prompt),
            ]
        } else {
            vec![PromptMessage::user(format!(
                "{}\n\n{}",
                system_prompt, user_prompt
            ))]
        }
    }

    /// Chat-completions body for `request`.
    pub fn request_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.api_model));
        body.insert(
            "messages".to_string(),
            json!(self.messages(&request.system_prompt, &request.user_prompt)),
        );
        body.insert(
            "temperature".to_string(),
            json!(self.temperature(request.temperature)),
        );
        body.insert(
            self.token_limit_field().to_string(),
            json!(request.max_tokens.min(self.max_tokens)),
        );
        if stream {
            body.insert("stream".to_string(), json!(true));
        }
        Value::Object(body)
    }
}
