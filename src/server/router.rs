use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{health, messages};
use crate::state::AppState;

/// Creates the application router.
///
/// - `GET /health`, `GET /api/status`
/// - `POST /api/messages`: the tagged request contract
/// - `POST /api/chat/stream`: chat turn as server-sent events
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.app_config.server.cors_allowed_origins);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::get_status))
        .route("/api/messages", post(messages::handle_message))
        .route("/api/chat/stream", post(messages::stream_chat))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(configured: &[String]) -> CorsLayer {
    let origins = if configured.is_empty() {
        default_local_origins()
    } else {
        configured.to_vec()
    };

    let allowed_origins = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    // Extension IDs differ per install, so any chrome-extension origin is
    // accepted unless an explicit list is configured.
    let allow_origin = if configured.is_empty() {
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            allowed_origins.contains(origin)
                || origin
                    .to_str()
                    .map(|o| o.starts_with("chrome-extension://") || o.starts_with("moz-extension://"))
                    .unwrap_or(false)
        })
    } else {
        AllowOrigin::list(allowed_origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
