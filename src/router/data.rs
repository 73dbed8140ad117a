use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use super::MessageRouter;
use crate::core::config::service::{deep_merge, redact_sensitive_values, restore_redacted_values};
use crate::core::config::Settings;
use crate::core::errors::ApiError;
use crate::llm::{ModelGateway, ProviderSelection};
use crate::storage::{self, KEY_PROMPT_TEMPLATES, KEY_SETTINGS};
use crate::templates::parse_import;

pub const EXPORT_VERSION: u32 = 1;

impl MessageRouter {
    pub(super) async fn redacted_settings(&self) -> Result<Value, ApiError> {
        let settings = self.settings().await;
        let raw = serde_json::to_value(&settings).map_err(ApiError::internal)?;
        Ok(redact_sensitive_values(&raw))
    }

    /// Merges `patch` over the current settings. Redacted placeholders keep
    /// their stored values.
    pub(super) async fn update_settings(&self, patch: Value) -> Result<Value, ApiError> {
        let prepared = self.prepare_settings(&patch).await?;
        self.commit_settings(prepared).await?;
        self.redacted_settings().await
    }

    /// Everything needed to apply new settings, validated but not yet written.
    async fn prepare_settings(&self, patch: &Value) -> Result<PreparedSettings, ApiError> {
        if !patch.is_object() {
            return Err(ApiError::BadRequest("Settings must be an object".to_string()));
        }
        let current = serde_json::to_value(self.settings().await).map_err(ApiError::internal)?;
        let merged = restore_redacted_values(&deep_merge(&current, patch), &current);
        let settings: Settings = serde_json::from_value(merged)
            .map_err(|e| ApiError::BadRequest(format!("Invalid settings: {}", e)))?;
        settings.validate()?;

        let selection = ProviderSelection::resolve(&settings, &self.gateway_config)?;
        let gateway = if self.gateway.read().await.selection() == &selection {
            None
        } else {
            Some(Arc::new(ModelGateway::from_settings(
                &settings,
                &self.gateway_config,
            )?))
        };

        Ok(PreparedSettings { settings, gateway })
    }

    async fn commit_settings(&self, prepared: PreparedSettings) -> Result<(), ApiError> {
        storage::save(self.store.as_ref(), KEY_SETTINGS, &prepared.settings).await?;
        if let Some(gateway) = prepared.gateway {
            tracing::info!("Settings changed provider selection; gateway replaced");
            *self.gateway.write().await = gateway;
        }
        *self.settings.write().await = prepared.settings;
        tracing::info!("Settings updated");
        Ok(())
    }

    pub(super) async fn export_data(&self) -> Result<Value, ApiError> {
        let templates = self.templates.list().await?;
        let user_templates: Vec<_> = templates.into_iter().filter(|t| !t.is_default).collect();
        Ok(json!({
            "version": EXPORT_VERSION,
            "exportedAt": Utc::now(),
            "settings": self.redacted_settings().await?,
            "promptTemplates": user_templates,
        }))
    }

    /// Validates every part of the payload before writing any of it.
    pub(super) async fn import_data(&self, payload: Value) -> Result<Value, ApiError> {
        let object = payload
            .as_object()
            .ok_or_else(|| ApiError::BadRequest("Import must be an object".to_string()))?;

        if let Some(version) = object.get("version").and_then(Value::as_u64) {
            if version > EXPORT_VERSION as u64 {
                return Err(ApiError::BadRequest(format!(
                    "Unsupported export version {}",
                    version
                )));
            }
        }

        let templates = object.get("promptTemplates");
        if let Some(templates) = templates {
            parse_import(templates)?;
        }
        let prepared = match object.get("settings") {
            Some(settings) => Some(self.prepare_settings(settings).await?),
            None => None,
        };

        let previous_templates = self.store.get(KEY_PROMPT_TEMPLATES).await?;
        let templates_imported = match templates {
            Some(templates) => self.templates.import(templates).await?,
            None => 0,
        };
        let settings_updated = prepared.is_some();
        if let Some(prepared) = prepared {
            if let Err(err) = self.commit_settings(prepared).await {
                if templates.is_some() {
                    self.restore_templates(previous_templates).await;
                }
                return Err(err);
            }
        }

        tracing::info!(
            "Imported data ({} templates, settings updated: {})",
            templates_imported,
            settings_updated
        );
        Ok(json!({
            "templatesImported": templates_imported,
            "settingsUpdated": settings_updated,
        }))
    }
}

impl MessageRouter {
    /// Puts back the template list captured before a failed import.
    async fn restore_templates(&self, previous: Option<Value>) {
        let restored = match previous {
            Some(value) => self.store.set(KEY_PROMPT_TEMPLATES, value).await,
            None => self.store.remove(KEY_PROMPT_TEMPLATES).await,
        };
        match restored {
            Ok(()) => tracing::warn!("Import failed while saving settings; templates restored"),
            Err(err) => tracing::error!("Failed to restore templates after import: {}", err),
        }
    }
}

struct PreparedSettings {
    settings: Settings,
    gateway: Option<Arc<ModelGateway>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use async_trait::async_trait;

    use super::*;
    use crate::core::config::service::REDACT_PLACEHOLDER;
    use crate::core::config::AppConfig;
    use crate::router::test_support::harness;
    use crate::session::{ReportedTabs, SessionManager};
    use crate::storage::{KvStore, MemoryStore};

    /// Memory store whose settings writes always fail.
    struct SettingsWriteFails(MemoryStore);

    #[async_trait]
    impl KvStore for SettingsWriteFails {
        async fn get(&self, key: &str) -> Result<Option<Value>, ApiError> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: Value) -> Result<(), ApiError> {
            if key == KEY_SETTINGS {
                return Err(ApiError::Internal("disk full".to_string()));
            }
            self.0.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), ApiError> {
            self.0.remove(key).await
        }

        async fn clear(&self) -> Result<(), ApiError> {
            self.0.clear().await
        }
    }

    #[tokio::test]
    async fn settings_are_redacted_on_read() {
        let h = harness().await;
        let updated = h
            .router
            .handle_value(json!({
                "type": "updateSettings",
                "payload": { "apiKey": "sk-secret", "model": "gpt-4o" }
            }))
            .await;
        assert!(updated.success, "{:?}", updated.error);
        let data = updated.data.expect("data");
        assert_eq!(data["apiKey"], REDACT_PLACEHOLDER);
        assert_eq!(data["model"], "gpt-4o");
        assert_eq!(data["maxTokens"], 4000);

        let settings = h.router.settings().await;
        assert_eq!(settings.api_key(), Some("sk-secret"));
        let stored: Option<Settings> = storage::load(h.store.as_ref(), KEY_SETTINGS)
            .await
            .expect("load");
        assert_eq!(stored.expect("stored").model, "gpt-4o");
    }

    #[tokio::test]
    async fn redacted_key_round_trip_keeps_secret() {
        let h = harness().await;
        h.router
            .update_settings(json!({ "apiKey": "sk-secret" }))
            .await
            .expect("update");
        h.router
            .update_settings(json!({ "apiKey": REDACT_PLACEHOLDER, "theme": "dark" }))
            .await
            .expect("update");

        let settings = h.router.settings().await;
        assert_eq!(settings.api_key(), Some("sk-secret"));
        assert_eq!(settings.theme, "dark");
    }

    #[tokio::test]
    async fn key_change_reconfigures_gateway() {
        let h = harness().await;
        assert_eq!(h.router.status().await.expect("status")["backend"], "local");

        h.router
            .update_settings(json!({ "apiKey": "sk-secret" }))
            .await
            .expect("update");
        assert_eq!(h.router.status().await.expect("status")["backend"], "openai");
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_without_write() {
        let h = harness().await;
        let err = h
            .router
            .update_settings(json!({ "provider": "mystery" }))
            .await;
        assert!(matches!(err, Err(ApiError::Configuration(_))));

        let err = h.router.update_settings(json!({ "maxTokens": 0 })).await;
        assert!(matches!(err, Err(ApiError::BadRequest(_))));

        assert_eq!(h.router.settings().await, Settings::default());
        assert!(h.store.get(KEY_SETTINGS).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn export_then_import_restores_templates() {
        let source = harness().await;
        source
            .router
            .handle_value(json!({
                "type": "saveTemplate",
                "payload": { "title": "Recruiter reply", "prompt": "Reply to {company}" }
            }))
            .await;
        source
            .router
            .update_settings(json!({ "apiKey": "sk-secret", "theme": "dark" }))
            .await
            .expect("update");
        let exported = source.router.export_data().await.expect("export");
        assert_eq!(exported["settings"]["apiKey"], REDACT_PLACEHOLDER);
        assert_eq!(exported["promptTemplates"].as_array().map(Vec::len), Some(1));

        let target = harness().await;
        let result = target.router.import_data(exported).await.expect("import");
        assert_eq!(result["templatesImported"], 1);
        assert_eq!(result["settingsUpdated"], true);

        let settings = target.router.settings().await;
        assert_eq!(settings.theme, "dark");
        // The placeholder has nothing to restore against, so no key is set.
        assert_eq!(settings.api_key(), None);

        let titles: Vec<String> = target
            .router
            .templates
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert!(titles.contains(&"Recruiter reply".to_string()));
    }

    #[tokio::test]
    async fn bad_template_rejects_entire_import() {
        let h = harness().await;
        let before = h.router.templates.list().await.expect("list");

        let result = h
            .router
            .handle_value(json!({
                "type": "importData",
                "payload": {
                    "settings": { "theme": "dark" },
                    "promptTemplates": [
                        { "title": "Good", "prompt": "ok" },
                        { "title": "Missing prompt" }
                    ]
                }
            }))
            .await;
        assert!(!result.success);

        assert_eq!(h.router.templates.list().await.expect("list"), before);
        assert_eq!(h.router.settings().await.theme, "light");
    }

    #[tokio::test]
    async fn newer_export_version_is_rejected() {
        let h = harness().await;
        let err = h.router.import_data(json!({ "version": 99 })).await;
        assert!(matches!(err, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn failed_settings_write_rolls_back_imported_templates() {
        let config = AppConfig::default();
        let store: Arc<dyn KvStore> = Arc::new(SettingsWriteFails(MemoryStore::new()));
        let sessions = Arc::new(SessionManager::new(store.clone(), config.session.clone()));
        let router = MessageRouter::new(
            store.clone(),
            sessions,
            Arc::new(ReportedTabs::new()),
            &config,
        )
        .await
        .expect("router");
        let before = store.get(KEY_PROMPT_TEMPLATES).await.expect("get");

        let err = router
            .import_data(json!({
                "version": 1,
                "settings": { "theme": "dark" },
                "promptTemplates": [{ "title": "Imported", "prompt": "Hi {user_name}" }]
            }))
            .await;
        assert!(matches!(err, Err(ApiError::Internal(_))));

        assert_eq!(store.get(KEY_PROMPT_TEMPLATES).await.expect("get"), before);
        let titles: Vec<String> = router
            .templates
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert!(!titles.contains(&"Imported".to_string()));
        assert_eq!(router.settings().await.theme, "light");
    }
}
