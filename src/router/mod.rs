//! Request dispatch for the extension UI.
//!
//! Every request is a tagged JSON object `{type, payload}` and every reply is
//! an envelope: `{success: true, data}` or `{success: false, error}`. Errors
//! never escape as transport failures; a failed chat turn is even recorded as
//! an assistant message explaining what went wrong.

mod chat;
mod data;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::core::config::{AppConfig, GatewayConfig, Settings};
use crate::core::errors::ApiError;
use crate::llm::gateway::DEFAULT_BASE_URL;
use crate::llm::{LocalFallbackProvider, ModelGateway, ProviderSelection};
use crate::page::{PageContent, RawPage, Selection};
use crate::rag::{ChunkStore, ContextBuilder, LocalEmbedder};
use crate::session::{ChatMessage, ReportedTabs, SessionManager};
use crate::storage::{self, KvStore, KEY_CURRENT_PAGE, KEY_LAST_SELECTION, KEY_SETTINGS};
use crate::templates::{TemplateInput, TemplateStore};

pub use chat::{ChatPayload, ChatReply};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Request {
    ExtractPageContent(RawPage),
    ProcessChatMessage(ChatPayload),
    GetTabContext(TabLookup),
    SaveTabContext(SaveTabContext),
    UpdateTabContext(UpdateTabContext),
    RemoveTabContext(RemoveTabContext),
    ReportOpenTabs(OpenTabs),
    SaveSelection(SelectionPayload),
    GetSettings,
    UpdateSettings(Value),
    GetTemplates,
    SaveTemplate(TemplateInput),
    DeleteTemplate(TemplateId),
    ExportData,
    ImportData(Value),
    ClearChunks(ClearChunks),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabLookup {
    pub tab_id: i64,
    pub url: String,
    pub session_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveTabContext {
    pub tab_id: i64,
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub session_key: String,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub page_content: Option<PageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTabContext {
    pub tab_id: i64,
    pub session_key: String,
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTabContext {
    pub tab_id: i64,
    #[serde(default)]
    pub session_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTabs {
    pub tab_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionPayload {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct TemplateId {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearChunks {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.user_message()),
        }
    }
}

pub struct MessageRouter {
    store: Arc<dyn KvStore>,
    sessions: Arc<SessionManager>,
    tabs: Arc<ReportedTabs>,
    chunks: ChunkStore,
    templates: TemplateStore,
    builder: ContextBuilder,
    gateway_config: GatewayConfig,
    settings: RwLock<Settings>,
    gateway: RwLock<Arc<ModelGateway>>,
}

impl MessageRouter {
    /// Loads stored settings and builds the initial gateway. A stored
    /// provider that cannot be built degrades to the local fallback; the
    /// configuration error resurfaces on the next chat turn.
    pub async fn new(
        store: Arc<dyn KvStore>,
        sessions: Arc<SessionManager>,
        tabs: Arc<ReportedTabs>,
        config: &AppConfig,
    ) -> Result<Self, ApiError> {
        let settings: Settings = storage::load(store.as_ref(), KEY_SETTINGS)
            .await?
            .unwrap_or_default();

        let gateway = match ModelGateway::from_settings(&settings, &config.gateway) {
            Ok(gateway) => gateway,
            Err(err) => {
                tracing::error!(
                    "Stored settings select an unusable provider ({}); using local fallback",
                    err
                );
                ModelGateway::with_provider(
                    ProviderSelection {
                        provider: crate::core::config::settings::PROVIDER_LOCAL.to_string(),
                        api_key: None,
                        base_url: DEFAULT_BASE_URL.to_string(),
                    },
                    Arc::new(LocalFallbackProvider),
                    Arc::new(LocalEmbedder),
                )
            }
        };

        Ok(Self {
            chunks: ChunkStore::new(store.clone(), config.rag.chunker.clone()),
            templates: TemplateStore::new(store.clone()),
            builder: ContextBuilder::new(config.rag.context.clone()),
            gateway_config: config.gateway.clone(),
            settings: RwLock::new(settings),
            gateway: RwLock::new(Arc::new(gateway)),
            store,
            sessions,
            tabs,
        })
    }

    /// Replaces the active gateway. The gateway is kept until the provider
    /// selection in the settings changes.
    pub async fn set_gateway(&self, gateway: ModelGateway) {
        *self.gateway.write().await = Arc::new(gateway);
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Decodes and handles a raw request body.
    pub async fn handle_value(&self, raw: Value) -> Envelope {
        match serde_json::from_value::<Request>(raw) {
            Ok(request) => self.handle(request).await,
            Err(err) => {
                tracing::warn!("Rejected malformed request: {}", err);
                Envelope::err(&ApiError::BadRequest(format!("Invalid request: {}", err)))
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Envelope {
        match self.dispatch(request).await {
            Ok(data) => Envelope::ok(data),
            Err(err) => {
                tracing::warn!("Request failed: {}", err);
                Envelope::err(&err)
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Value, ApiError> {
        match request {
            Request::ExtractPageContent(raw) => self.extract_page_content(raw).await,
            Request::ProcessChatMessage(payload) => to_value(self.process_chat(payload).await?),
            Request::GetTabContext(lookup) => to_value(
                self.sessions
                    .get(lookup.tab_id, &lookup.url, &lookup.session_key)
                    .await?,
            ),
            Request::SaveTabContext(ctx) => to_value(
                self.sessions
                    .save(
                        ctx.tab_id,
                        &ctx.url,
                        &ctx.title,
                        &ctx.session_key,
                        &ctx.chat_history,
                        ctx.page_content,
                    )
                    .await?,
            ),
            Request::UpdateTabContext(update) => {
                let updated = self
                    .sessions
                    .update_history(update.tab_id, &update.session_key, &update.chat_history)
                    .await?;
                Ok(json!({ "updated": updated }))
            }
            Request::RemoveTabContext(remove) => {
                let removed = self
                    .sessions
                    .remove(remove.tab_id, remove.session_key.as_deref())
                    .await?;
                Ok(json!({ "removed": removed }))
            }
            Request::ReportOpenTabs(open) => {
                self.tabs.report(open.tab_ids).await;
                let removed = self.sessions.cleanup_by_liveness(self.tabs.as_ref()).await?;
                Ok(json!({ "removed": removed }))
            }
            Request::SaveSelection(selection) => self.save_selection(selection).await,
            Request::GetSettings => self.redacted_settings().await,
            Request::UpdateSettings(patch) => self.update_settings(patch).await,
            Request::GetTemplates => to_value(self.templates.list().await?),
            Request::SaveTemplate(input) => to_value(self.templates.save(input).await?),
            Request::DeleteTemplate(TemplateId { id }) => {
                self.templates.delete(&id).await?;
                Ok(json!({ "deleted": id }))
            }
            Request::ExportData => self.export_data().await,
            Request::ImportData(payload) => self.import_data(payload).await,
            Request::ClearChunks(ClearChunks { url }) => {
                let removed = match url {
                    Some(url) => self.chunks.clear_url(&url).await?,
                    None => {
                        let count = self.chunks.count().await?;
                        self.chunks.clear_all().await?;
                        count
                    }
                };
                Ok(json!({ "removed": removed }))
            }
        }
    }

    /// Stores the page as the current page and, with retrieval enabled,
    /// re-chunks it. Chunking failures are logged, not returned.
    async fn extract_page_content(&self, raw: RawPage) -> Result<Value, ApiError> {
        if raw.url.trim().is_empty() {
            return Err(ApiError::BadRequest("Page URL is required".to_string()));
        }
        let page = PageContent::from_raw(raw);
        storage::save(self.store.as_ref(), KEY_CURRENT_PAGE, &page).await?;

        let settings = self.settings().await;
        let mut chunks_stored = 0;
        if settings.rag_enabled && !page.content.is_empty() {
            match self.gateway_for(&settings).await {
                Ok(gateway) => match self.chunks.ingest(&page, gateway.embedder()).await {
                    Ok(chunks) => chunks_stored = chunks.len(),
                    Err(err) => tracing::warn!("Failed to store chunks for {}: {}", page.url, err),
                },
                Err(err) => tracing::warn!("Skipping chunking for {}: {}", page.url, err),
            }
        }

        tracing::info!(
            "Extracted page {} ({} chars, {} chunks)",
            page.url,
            page.content.chars().count(),
            chunks_stored
        );
        Ok(json!({ "page": page, "chunksStored": chunks_stored }))
    }

    async fn save_selection(&self, payload: SelectionPayload) -> Result<Value, ApiError> {
        if payload.text.trim().is_empty() {
            return Err(ApiError::BadRequest("Selection text is empty".to_string()));
        }
        let selection = Selection {
            text: payload.text,
            url: payload.url,
            timestamp: Utc::now(),
        };
        storage::save(self.store.as_ref(), KEY_LAST_SELECTION, &selection).await?;
        to_value(selection)
    }

    /// Current gateway, rebuilt first if provider, key or base URL changed.
    async fn gateway_for(&self, settings: &Settings) -> Result<Arc<ModelGateway>, ApiError> {
        let selection = ProviderSelection::resolve(settings, &self.gateway_config)?;
        {
            let current = self.gateway.read().await;
            if current.selection() == &selection {
                return Ok(current.clone());
            }
        }

        tracing::info!("Provider selection changed, reconfiguring model gateway");
        let gateway = Arc::new(ModelGateway::from_settings(settings, &self.gateway_config)?);
        *self.gateway.write().await = gateway.clone();
        Ok(gateway)
    }

    /// Summary for the status endpoint.
    pub async fn status(&self) -> Result<Value, ApiError> {
        let settings = self.settings().await;
        let gateway = self.gateway.read().await.clone();
        let sessions = self.sessions.stats().await?;
        Ok(json!({
            "provider": settings.provider,
            "model": settings.model,
            "backend": gateway.backend(),
            "ragEnabled": settings.rag_enabled,
            "sessions": sessions,
            "chunks": self.chunks.count().await?,
        }))
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(ApiError::internal)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::storage::MemoryStore;

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub sessions: Arc<SessionManager>,
        pub router: MessageRouter,
    }

    pub async fn harness() -> Harness {
        harness_with(AppConfig::default()).await
    }

    pub async fn harness_with(config: AppConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::new(store.clone(), config.session.clone()));
        let router = MessageRouter::new(
            store.clone(),
            sessions.clone(),
            Arc::new(ReportedTabs::new()),
            &config,
        )
        .await
        .expect("router");
        Harness {
            store,
            sessions,
            router,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;

    #[tokio::test]
    async fn malformed_requests_get_error_envelope() {
        let h = harness().await;
        let envelope = h.router.handle_value(json!({ "type": "noSuchThing" })).await;
        assert!(!envelope.success);
        assert!(envelope.error.unwrap_or_default().contains("Invalid request"));

        let envelope = h
            .router
            .handle_value(json!({ "type": "getTabContext", "payload": { "tabId": "x" } }))
            .await;
        assert!(!envelope.success);
    }

    #[tokio::test]
    async fn envelope_serializes_without_empty_fields() {
        let ok = serde_json::to_value(Envelope::ok(json!(1))).expect("serialize");
        assert_eq!(ok, json!({ "success": true, "data": 1 }));

        let err = serde_json::to_value(Envelope::err(&ApiError::Internal("secret".into())))
            .expect("serialize");
        assert_eq!(err, json!({ "success": false, "error": "Internal error" }));
    }

    #[tokio::test]
    async fn tab_context_round_trip_through_requests() {
        let h = harness().await;
        let saved = h
            .router
            .handle_value(json!({
                "type": "saveTabContext",
                "payload": {
                    "tabId": 4,
                    "url": "https://a.com/",
                    "title": "A",
                    "sessionKey": "k1",
                    "chatHistory": []
                }
            }))
            .await;
        assert!(saved.success);

        let fetched = h
            .router
            .handle_value(json!({
                "type": "getTabContext",
                "payload": { "tabId": 4, "url": "https://a.com/", "sessionKey": "k1" }
            }))
            .await;
        assert_eq!(fetched.data.expect("data")["title"], "A");

        let missing = h
            .router
            .handle_value(json!({
                "type": "getTabContext",
                "payload": { "tabId": 4, "url": "https://b.com/", "sessionKey": "k1" }
            }))
            .await;
        assert!(missing.success);
        assert_eq!(missing.data, Some(Value::Null));

        let updated = h
            .router
            .handle_value(json!({
                "type": "updateTabContext",
                "payload": { "tabId": 9, "sessionKey": "none", "chatHistory": [] }
            }))
            .await;
        assert_eq!(updated.data.expect("data")["updated"], false);

        let removed = h
            .router
            .handle_value(json!({ "type": "removeTabContext", "payload": { "tabId": 4 } }))
            .await;
        assert_eq!(removed.data.expect("data")["removed"], 1);
    }

    #[tokio::test]
    async fn report_open_tabs_evicts_closed_tabs() {
        let h = harness().await;
        h.sessions.save(1, "https://a.com/", "A", "k", &[], None).await.expect("save");
        h.sessions.save(2, "https://a.com/", "A", "k", &[], None).await.expect("save");

        let envelope = h
            .router
            .handle_value(json!({ "type": "reportOpenTabs", "payload": { "tabIds": [2] } }))
            .await;
        assert_eq!(envelope.data.expect("data")["removed"], 1);
        assert_eq!(h.sessions.stats().await.expect("stats").contexts, 1);
    }

    #[tokio::test]
    async fn extract_page_stores_page_and_chunks() {
        let h = harness().await;
        let envelope = h
            .router
            .handle_value(json!({
                "type": "extractPageContent",
                "payload": {
                    "url": "https://jobs.example.com/1",
                    "title": "Backend Engineer",
                    "content": "The role requires 5 years of experience with distributed systems. ".repeat(40)
                }
            }))
            .await;
        assert!(envelope.success, "{:?}", envelope.error);
        let data = envelope.data.expect("data");
        assert!(data["chunksStored"].as_u64().unwrap_or(0) >= 2);
        assert_eq!(data["page"]["title"], "Backend Engineer");

        let stored = h.store.get(KEY_CURRENT_PAGE).await.expect("get");
        assert!(stored.is_some());

        let cleared = h
            .router
            .handle_value(json!({ "type": "clearChunks", "payload": {} }))
            .await;
        assert_eq!(cleared.data.expect("data")["removed"], data["chunksStored"]);
    }

    #[tokio::test]
    async fn extract_page_requires_url() {
        let h = harness().await;
        let envelope = h
            .router
            .handle_value(json!({ "type": "extractPageContent", "payload": { "url": " " } }))
            .await;
        assert!(!envelope.success);
    }

    #[tokio::test]
    async fn selection_is_stored_and_empty_selection_rejected() {
        let h = harness().await;
        let ok = h
            .router
            .handle_value(json!({
                "type": "saveSelection",
                "payload": { "text": "5 years Rust", "url": "https://a.com/" }
            }))
            .await;
        assert!(ok.success);
        let stored: Option<Selection> = storage::load(h.store.as_ref(), KEY_LAST_SELECTION)
            .await
            .expect("load");
        assert_eq!(stored.map(|s| s.text).as_deref(), Some("5 years Rust"));

        let empty = h
            .router
            .handle_value(json!({
                "type": "saveSelection",
                "payload": { "text": "  ", "url": "https://a.com/" }
            }))
            .await;
        assert!(!empty.success);
    }

    #[tokio::test]
    async fn templates_are_listed_and_defaults_protected() {
        let h = harness().await;
        let list = h.router.handle_value(json!({ "type": "getTemplates" })).await;
        let templates = list.data.expect("data");
        assert!(templates.as_array().map(|t| !t.is_empty()).unwrap_or(false));

        let default_id = templates[0]["id"].as_str().expect("id").to_string();
        let delete = h
            .router
            .handle_value(json!({ "type": "deleteTemplate", "payload": { "id": default_id } }))
            .await;
        assert!(!delete.success);

        let created = h
            .router
            .handle_value(json!({
                "type": "saveTemplate",
                "payload": { "title": "Mine", "prompt": "Answer as {user_name}" }
            }))
            .await;
        let id = created.data.expect("data")["id"].as_str().expect("id").to_string();
        let delete = h
            .router
            .handle_value(json!({ "type": "deleteTemplate", "payload": { "id": id } }))
            .await;
        assert!(delete.success);
    }

    #[tokio::test]
    async fn status_reports_local_backend_without_key() {
        let h = harness().await;
        let status = h.router.status().await.expect("status");
        assert_eq!(status["backend"], "local");
        assert_eq!(status["sessions"]["contexts"], 0);
    }
}
