use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::MessageRouter;
use crate::core::config::Settings;
use crate::core::errors::ApiError;
use crate::llm::cloud::STREAM_BUFFER;
use crate::llm::tokens::{estimate_tokens, tokens_to_chars};
use crate::llm::{models, GenerationRequest, GenerationResponse, ModelGateway, TextStream};
use crate::page::{truncate_chars, PageContent, Selection};
use crate::session::{ChatMessage, MessageContext, MessageMetadata, Role, SessionManager};
use crate::storage::{self, KEY_CURRENT_PAGE, KEY_LAST_SELECTION};
use crate::templates::{PlaceholderValues, PromptTemplate};

/// Share of the token budget the raw page content may take.
const CONTENT_BUDGET_RATIO: f64 = 0.6;
const TRANSCRIPT_MESSAGES: usize = 8;
const TRANSCRIPT_MESSAGE_CHARS: usize = 800;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub tab_id: i64,
    pub url: String,
    pub session_key: String,
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Overrides the template selected in settings for this turn.
    #[serde(default)]
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub message: ChatMessage,
    pub cost_warning: bool,
    pub retrieved_chunks: usize,
    pub history_length: usize,
}

/// Session state after the user message was recorded.
struct Turn {
    history: Vec<ChatMessage>,
    page: Option<PageContent>,
    selection: Option<Selection>,
}

struct Composed {
    request: GenerationRequest,
    retrieved_chunks: usize,
}

impl MessageRouter {
    /// One chat turn. The user message is persisted before generation; the
    /// reply, or an assistant message explaining the failure, afterwards.
    pub async fn process_chat(&self, payload: ChatPayload) -> Result<ChatReply, ApiError> {
        validate_payload(&payload)?;
        let settings = self.settings().await;
        let mut turn = self.begin_turn(&payload).await?;

        let mut retrieved_chunks = 0;
        let result = async {
            let gateway = self.gateway_for(&settings).await?;
            let composed = self.compose(&payload, &settings, &turn).await?;
            retrieved_chunks = composed.retrieved_chunks;
            let response = gateway.generate(&composed.request).await?;
            Ok::<GenerationResponse, ApiError>(response)
        }
        .await;

        let (message, cost_warning) = match result {
            Ok(response) => {
                let cost_warning = response.cost > settings.cost_warning_threshold;
                if cost_warning {
                    tracing::warn!(
                        "Turn cost ${:.4} exceeds warning threshold ${:.4}",
                        response.cost,
                        settings.cost_warning_threshold
                    );
                }
                (reply_message(response), cost_warning)
            }
            Err(err) => {
                tracing::error!("Chat turn failed for tab {}: {}", payload.tab_id, err);
                (failure_message(&err), false)
            }
        };

        turn.history.push(message.clone());
        self.sessions
            .update_history(payload.tab_id, &payload.session_key, &turn.history)
            .await?;

        Ok(ChatReply {
            message,
            cost_warning,
            retrieved_chunks,
            history_length: turn.history.len(),
        })
    }

    /// Streaming variant of `process_chat`. Deltas are forwarded as they
    /// arrive; the assembled reply is appended to the session once the
    /// provider finishes or the receiver is dropped.
    pub async fn stream_chat(&self, payload: ChatPayload) -> Result<TextStream, ApiError> {
        validate_payload(&payload)?;
        let settings = self.settings().await;
        let mut turn = self.begin_turn(&payload).await?;

        let started = async {
            let gateway = self.gateway_for(&settings).await?;
            let composed = self.compose(&payload, &settings, &turn).await?;
            let upstream = gateway.stream(&composed.request).await?;
            Ok::<(Arc<ModelGateway>, Composed, TextStream), ApiError>((gateway, composed, upstream))
        }
        .await;

        let (gateway, composed, mut upstream) = match started {
            Ok(started) => started,
            Err(err) => {
                turn.history.push(failure_message(&err));
                self.sessions
                    .update_history(payload.tab_id, &payload.session_key, &turn.history)
                    .await?;
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let sessions: Arc<SessionManager> = self.sessions.clone();
        let local = gateway.is_local_fallback();

        tokio::spawn(async move {
            let mut content = String::new();
            let mut finish_reason = "stop";
            let mut error = None;

            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(delta) => {
                        content.push_str(&delta);
                        if tx.send(Ok(delta)).await.is_err() {
                            finish_reason = "cancelled";
                            break;
                        }
                    }
                    Err(err) => {
                        error = Some(err.user_message());
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
            // Dropping the upstream receiver stops the provider task.
            drop(upstream);

            let request = &composed.request;
            let message = match error {
                Some(reason) => streamed_failure_message(&content, reason, &request.model),
                None => {
                    let prompt_tokens = (estimate_tokens(&request.system_prompt)
                        + estimate_tokens(&request.user_prompt))
                        as u64;
                    let completion_tokens = estimate_tokens(&content) as u64;
                    let cost = if local {
                        0.0
                    } else {
                        models::estimate_cost(&request.model, prompt_tokens, completion_tokens)
                    };
                    ChatMessage::assistant(
                        content,
                        MessageMetadata {
                            tokens: Some(prompt_tokens + completion_tokens),
                            model: Some(request.model.clone()),
                            cost: Some(cost),
                            finish_reason: Some(finish_reason.to_string()),
                            error: None,
                        },
                    )
                }
            };
            turn.history.push(message);
            if let Err(err) = sessions
                .update_history(payload.tab_id, &payload.session_key, &turn.history)
                .await
            {
                tracing::error!("Failed to persist streamed reply: {}", err);
            }
            drop(tx);
        });

        Ok(rx)
    }

    /// Finds or creates the session and records the user message.
    async fn begin_turn(&self, payload: &ChatPayload) -> Result<Turn, ApiError> {
        let current_page: Option<PageContent> =
            storage::load(self.store.as_ref(), KEY_CURRENT_PAGE).await?;
        let current_page = current_page.filter(|page| page.url == payload.url);
        let selection: Option<Selection> =
            storage::load(self.store.as_ref(), KEY_LAST_SELECTION).await?;
        let selection = selection.filter(|sel| sel.url == payload.url);

        let context = match self
            .sessions
            .get(payload.tab_id, &payload.url, &payload.session_key)
            .await?
        {
            Some(context) => context,
            None => {
                let title = payload
                    .title
                    .clone()
                    .or_else(|| current_page.as_ref().map(|page| page.title.clone()))
                    .unwrap_or_default();
                tracing::debug!("Starting session for tab {}", payload.tab_id);
                self.sessions
                    .save(
                        payload.tab_id,
                        &payload.url,
                        &title,
                        &payload.session_key,
                        &[],
                        current_page.clone(),
                    )
                    .await?
            }
        };

        let page = current_page.or(context.page_content);
        let mut history = context.chat_history;
        history.push(ChatMessage::user(
            payload.message.clone(),
            Some(MessageContext {
                selection: selection.as_ref().map(|sel| sel.text.clone()),
                page_url: Some(payload.url.clone()),
                page_title: page.as_ref().map(|p| p.title.clone()),
            }),
        ));
        self.sessions
            .update_history(payload.tab_id, &payload.session_key, &history)
            .await?;

        Ok(Turn {
            history,
            page,
            selection,
        })
    }

    async fn compose(
        &self,
        payload: &ChatPayload,
        settings: &Settings,
        turn: &Turn,
    ) -> Result<Composed, ApiError> {
        let (context_block, retrieved_chunks) =
            self.combined_context(payload, settings, turn).await?;
        let template = self.resolve_template(payload, settings).await?;

        let values = PlaceholderValues::from_page(
            turn.page.as_ref(),
            turn.selection.as_ref().map(|sel| sel.text.as_str()),
            settings.user_name.as_deref(),
        );
        let system_prompt = self
            .builder
            .system_prompt(template.as_ref(), &context_block, &values);
        let user_prompt = self
            .builder
            .user_prompt(&payload.message, !context_block.is_empty());

        Ok(Composed {
            request: GenerationRequest {
                system_prompt,
                user_prompt,
                model: settings.model.clone(),
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
            },
            retrieved_chunks,
        })
    }

    /// Page header, selection, page content slice, retrieved chunks and the
    /// recent transcript, in that order.
    async fn combined_context(
        &self,
        payload: &ChatPayload,
        settings: &Settings,
        turn: &Turn,
    ) -> Result<(String, usize), ApiError> {
        let mut sections = Vec::new();

        if let Some(page) = &turn.page {
            let mut header = format!("Page: {}\nURL: {}", page.title, page.url);
            if !page.description.trim().is_empty() {
                header.push_str(&format!("\nDescription: {}", page.description));
            }
            sections.push(header);
        }

        if let Some(selection) = &turn.selection {
            sections.push(format!("Selected text:\n{}", selection.text));
        }

        if let Some(page) = &turn.page {
            let max_chars = content_char_budget(settings.max_tokens);
            let slice = truncate_chars(&page.content, max_chars);
            if !slice.is_empty() {
                sections.push(format!("Page content:\n{}", slice));
            }
        }

        let mut retrieved_chunks = 0;
        if settings.rag_enabled {
            let chunks = self.chunks.all_chunks().await?;
            let relevant = self.builder.retrieve(&payload.message, &chunks);
            let fitting = self
                .builder
                .optimize_for_budget(&relevant, settings.max_tokens as usize);
            let (block, included) = self.builder.assemble_context_counted(fitting);
            if !block.is_empty() {
                retrieved_chunks = included;
                sections.push(format!("Related excerpts:\n{}", block.trim_end()));
            }
        }

        let previous = &turn.history[..turn.history.len().saturating_sub(1)];
        let transcript = render_transcript(previous);
        if !transcript.is_empty() {
            sections.push(format!("Recent conversation:\n{}", transcript));
        }

        Ok((sections.join("\n\n"), retrieved_chunks))
    }

    async fn resolve_template(
        &self,
        payload: &ChatPayload,
        settings: &Settings,
    ) -> Result<Option<PromptTemplate>, ApiError> {
        let Some(id) = payload
            .template_id
            .as_deref()
            .or(settings.selected_template_id.as_deref())
            .filter(|id| !id.trim().is_empty())
        else {
            return Ok(None);
        };

        let template = self.templates.get(id).await?;
        if template.is_none() {
            tracing::warn!("Template '{}' not found, using default prompt", id);
        }
        Ok(template)
    }
}

fn validate_payload(payload: &ChatPayload) -> Result<(), ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
    }
    if payload.session_key.trim().is_empty() {
        return Err(ApiError::BadRequest("Session key is required".to_string()));
    }
    Ok(())
}

/// `floor(budget * 0.6)` tokens, in characters.
fn content_char_budget(max_tokens: u32) -> usize {
    tokens_to_chars((max_tokens as f64 * CONTENT_BUDGET_RATIO).floor() as usize)
}

/// Last eight non-system messages, each cut to 800 characters.
fn render_transcript(history: &[ChatMessage]) -> String {
    let recent: Vec<&ChatMessage> = history
        .iter()
        .filter(|message| message.role != Role::System)
        .collect();
    let start = recent.len().saturating_sub(TRANSCRIPT_MESSAGES);

    recent[start..]
        .iter()
        .map(|message| {
            let speaker = match message.role {
                Role::User => "User",
                _ => "Assistant",
            };
            format!(
                "{}: {}",
                speaker,
                truncate_chars(&message.content, TRANSCRIPT_MESSAGE_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn reply_message(response: GenerationResponse) -> ChatMessage {
    ChatMessage::assistant(
        response.content,
        MessageMetadata {
            tokens: Some(response.usage.total_tokens),
            model: Some(response.model),
            cost: Some(response.cost),
            finish_reason: response.finish_reason,
            error: None,
        },
    )
}

/// Partial text received before the failure is kept ahead of the
/// explanation. Failed turns carry no cost.
fn streamed_failure_message(partial: &str, reason: String, model: &str) -> ChatMessage {
    let explanation = format!("Sorry, I couldn't finish the response. {}", reason);
    let content = if partial.trim().is_empty() {
        explanation
    } else {
        format!("{}\n\n{}", partial.trim_end(), explanation)
    };
    ChatMessage::assistant(
        content,
        MessageMetadata {
            model: Some(model.to_string()),
            finish_reason: Some("error".to_string()),
            error: Some(reason),
            ..Default::default()
        },
    )
}

fn failure_message(err: &ApiError) -> ChatMessage {
    let reason = err.user_message();
    ChatMessage::assistant(
        format!("Sorry, I couldn't generate a response. {}", reason),
        MessageMetadata {
            error: Some(reason),
            ..Default::default()
        },
    )
}
