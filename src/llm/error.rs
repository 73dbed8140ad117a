use thiserror::Error;

use crate::core::errors::ApiError;

const MAX_BODY_CHARS: usize = 500;

/// Why a gateway call failed. Nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing key, unknown provider, unusable base URL.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The API answered with a non-2xx status.
    #[error("API request failed with status {status}: {body}")]
    Http { status: u16, body: String },
    /// Connection refused, DNS failure, reset.
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    /// 2xx response that does not match the completion contract.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn network(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Explanation suitable for showing in the chat transcript.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Configuration(msg) => format!("Configuration problem: {}", msg),
            GatewayError::Http { status, body } => match status {
                401 | 403 => {
                    "The model API rejected the request. Check your API key in settings."
                        .to_string()
                }
                402 => "The model API reported a billing problem; your quota may be exhausted."
                    .to_string(),
                404 => "The selected model was not found by the API.".to_string(),
                429 => "The model API is rate limiting requests. Try again shortly.".to_string(),
                500..=599 => {
                    format!("The model API is having problems (status {}).", status)
                }
                _ => format!(
                    "The model API returned status {}: {}",
                    status,
                    truncate_body(body)
                ),
            },
            GatewayError::Network(_) => {
                "Could not reach the model API. Check your network connection.".to_string()
            }
            GatewayError::Timeout(_) => "The model API took too long to respond.".to_string(),
            GatewayError::InvalidResponse(msg) => {
                format!("The model API returned an unexpected response: {}", msg)
            }
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Configuration(msg) => ApiError::Configuration(msg),
            other => ApiError::Upstream(other.user_message()),
        }
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_point_at_the_api_key() {
        let err = GatewayError::Http {
            status: 401,
            body: "{\"error\":\"bad key\"}".to_string(),
        };
        assert_eq!(err.status(), Some(401));
        assert!(err.user_message().contains("API key"));
    }

    #[test]
    fn display_keeps_status_and_body() {
        let err = GatewayError::Http {
            status: 418,
            body: "teapot".to_string(),
        };
        assert_eq!(err.to_string(), "API request failed with status 418: teapot");
        assert!(err.user_message().contains("teapot"));
    }

    #[test]
    fn long_bodies_are_truncated_for_users() {
        let err = GatewayError::Http {
            status: 400,
            body: "x".repeat(2000),
        };
        assert!(err.user_message().len() < 700);
    }

    #[test]
    fn configuration_errors_map_to_configuration_api_errors() {
        let api: ApiError = GatewayError::Configuration("no key".to_string()).into();
        assert!(matches!(api, ApiError::Configuration(_)));

        let api: ApiError = GatewayError::Network("refused".to_string()).into();
        assert!(matches!(api, ApiError::Upstream(_)));
    }
}
