//! Prompt templates.
//!
//! A global list stored under `promptTemplates`. Defaults are seeded the
//! first time the list is read and stay read-only; user templates can be
//! created, edited and deleted freely.

mod defaults;

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ApiError;
use crate::page::PageContent;
use crate::storage::{self, KvStore, KEY_PROMPT_TEMPLATES};

pub use defaults::generate_default_templates;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(context|page_title|company|job_description|user_name|job_url|selection)\}")
        .expect("placeholder regex must compile")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a client may set when creating or editing a template.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInput {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Values substituted into `{placeholder}` markers.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderValues {
    pub context: String,
    pub page_title: String,
    pub company: String,
    pub job_description: String,
    pub user_name: String,
    pub job_url: String,
    pub selection: String,
}

impl PlaceholderValues {
    pub fn from_page(
        page: Option<&PageContent>,
        selection: Option<&str>,
        user_name: Option<&str>,
    ) -> Self {
        let mut values = PlaceholderValues {
            selection: selection.unwrap_or_default().to_string(),
            user_name: user_name.unwrap_or("the user").to_string(),
            ..Default::default()
        };
        if let Some(page) = page {
            values.page_title = page.title.clone();
            values.company = page.company.clone().unwrap_or_default();
            values.job_description = page.job_description().to_string();
            values.job_url = page.url.clone();
        }
        values
    }
}

/// Replaces every known placeholder in one pass, so substituted text is
/// never scanned for further placeholders. Unknown `{...}` markers are kept.
pub fn render_template(prompt: &str, values: &PlaceholderValues) -> String {
    PLACEHOLDER_RE
        .replace_all(prompt, |caps: &Captures| match &caps[1] {
            "context" => values.context.clone(),
            "page_title" => values.page_title.clone(),
            "company" => values.company.clone(),
            "job_description" => values.job_description.clone(),
            "user_name" => values.user_name.clone(),
            "job_url" => values.job_url.clone(),
            "selection" => values.selection.clone(),
            other => format!("{{{}}}", other),
        })
        .into_owned()
}

#[derive(Clone)]
pub struct TemplateStore {
    store: Arc<dyn KvStore>,
}

impl TemplateStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// All templates, seeding the defaults if nothing was stored yet.
    pub async fn list(&self) -> Result<Vec<PromptTemplate>, ApiError> {
        if let Some(templates) = self.load().await? {
            return Ok(templates);
        }
        let defaults = generate_default_templates(Utc::now());
        self.persist(&defaults).await?;
        tracing::info!("Seeded {} default prompt templates", defaults.len());
        Ok(defaults)
    }

    pub async fn get(&self, id: &str) -> Result<Option<PromptTemplate>, ApiError> {
        Ok(self.list().await?.into_iter().find(|t| t.id == id))
    }

    /// Creates a template, or edits the user template with `input.id`.
    pub async fn save(&self, input: TemplateInput) -> Result<PromptTemplate, ApiError> {
        validate_fields(&input.title, &input.prompt)?;
        let mut templates = self.list().await?;
        let now = Utc::now();

        let existing = input
            .id
            .as_deref()
            .and_then(|id| templates.iter().position(|t| t.id == id));

        let saved = match existing {
            Some(idx) if templates[idx].is_default => {
                return Err(ApiError::BadRequest(
                    "Default templates cannot be modified".to_string(),
                ));
            }
            Some(idx) => {
                let template = &mut templates[idx];
                template.title = input.title;
                template.prompt = input.prompt;
                template.description = input.description;
                template.updated_at = now;
                template.clone()
            }
            None => {
                let template = PromptTemplate {
                    id: input
                        .id
                        .filter(|id| !id.trim().is_empty())
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    title: input.title,
                    prompt: input.prompt,
                    description: input.description,
                    is_default: false,
                    created_at: now,
                    updated_at: now,
                };
                templates.push(template.clone());
                template
            }
        };

        self.persist(&templates).await?;
        Ok(saved)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let mut templates = self.list().await?;
        let position = templates
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("Template not found: {}", id)))?;
        if templates[position].is_default {
            return Err(ApiError::BadRequest(
                "Default templates cannot be deleted".to_string(),
            ));
        }
        templates.remove(position);
        self.persist(&templates).await
    }

    /// Imports user templates from an exported array.
    ///
    /// Every entry is validated before anything is written; one bad entry
    /// rejects the whole import. Imported entries replace user templates
    /// with the same id and never overwrite defaults.
    pub async fn import(&self, payload: &Value) -> Result<usize, ApiError> {
        let incoming = parse_import(payload)?;
        let mut templates = self.list().await?;
        let now = Utc::now();
        let count = incoming.len();

        for input in incoming {
            let collides_with_default = input
                .id
                .as_deref()
                .map(|id| templates.iter().any(|t| t.id == id && t.is_default))
                .unwrap_or(false);
            let id = match input.id.filter(|id| !id.trim().is_empty()) {
                Some(id) if !collides_with_default => id,
                _ => uuid::Uuid::new_v4().to_string(),
            };

            templates.retain(|t| t.id != id);
            templates.push(PromptTemplate {
                id,
                title: input.title,
                prompt: input.prompt,
                description: input.description,
                is_default: false,
                created_at: now,
                updated_at: now,
            });
        }

        self.persist(&templates).await?;
        tracing::info!("Imported {} prompt templates", count);
        Ok(count)
    }

    async fn load(&self) -> Result<Option<Vec<PromptTemplate>>, ApiError> {
        storage::load(self.store.as_ref(), KEY_PROMPT_TEMPLATES).await
    }

    async fn persist(&self, templates: &[PromptTemplate]) -> Result<(), ApiError> {
        storage::save(self.store.as_ref(), KEY_PROMPT_TEMPLATES, templates).await
    }
}

fn validate_fields(title: &str, prompt: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::BadRequest("Template title is required".to_string()));
    }
    if prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Template prompt is required".to_string()));
    }
    Ok(())
}

/// Validates an import payload without touching storage.
pub fn parse_import(payload: &Value) -> Result<Vec<TemplateInput>, ApiError> {
    let items = payload.as_array().ok_or_else(|| {
        ApiError::BadRequest("Template import must be an array".to_string())
    })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let object = item.as_object().ok_or_else(|| {
                ApiError::BadRequest(format!("Template {} must be an object", index))
            })?;
            let title = required_string(object.get("title"), index, "title")?;
            let prompt = required_string(object.get("prompt"), index, "prompt")?;
            let id = object
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let description = object
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Ok(TemplateInput {
                id,
                title,
                prompt,
                description,
            })
        })
        .collect()
}

fn required_string(value: Option<&Value>, index: usize, field: &str) -> Result<String, ApiError> {
    value
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Template {} is missing required field '{}'",
                index, field
            ))
        })
}
