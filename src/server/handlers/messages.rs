use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::core::errors::ApiError;
use crate::router::ChatPayload;
use crate::state::AppState;

/// Envelope errors are part of the contract, so the status is 200 either way.
pub async fn handle_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    Json(state.router.handle_value(body).await)
}

/// Streams `delta` events, an `error` event if the provider fails midway,
/// and a final `done` event. Closing the connection cancels the turn.
pub async fn stream_chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatPayload>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state.router.stream_chat(payload).await?;

    let deltas = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .map(|item| {
        let event = match item {
            Ok(delta) => Event::default().event("delta").data(delta),
            Err(err) => Event::default().event("error").data(err.user_message()),
        };
        Ok(event)
    });
    let done = stream::once(async { Ok(Event::default().event("done").data("[DONE]")) });

    Ok(Sse::new(deltas.chain(done)).keep_alive(KeepAlive::default()))
}
