//! Per-tab conversation sessions.
//!
//! A session is one (tab, navigation) pair. Reloading or navigating a tab
//! starts a new session; the old one stays until it is evicted by age,
//! by the context cap, or because its tab closed.

mod cleanup;
mod manager;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::page::PageContent;

pub use cleanup::{spawn_cleanup_task, ReportedTabs, TabRegistry};
pub use manager::{SessionManager, SessionStats};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_age: Duration,
    pub max_contexts: usize,
    pub cleanup_interval: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            max_contexts: 50,
            cleanup_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Identity of a stored session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey {
    pub tab_id: i64,
    pub session_key: String,
}

impl ContextKey {
    pub fn new(tab_id: i64, session_key: impl Into<String>) -> Self {
        Self {
            tab_id,
            session_key: session_key.into(),
        }
    }
}

/// `origin + path + navigationStart` for a page load. Query and fragment
/// are ignored, so in-page navigation keeps the session.
pub fn session_key_for(url: &str, navigation_start_ms: i64) -> Result<String, ApiError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ApiError::BadRequest(format!("Invalid page URL '{}': {}", url, e)))?;
    Ok(format!(
        "{}{}{}",
        parsed.origin().ascii_serialization(),
        parsed.path(),
        navigation_start_ms
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Set when the message explains a failed turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<MessageContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            context: None,
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>, context: Option<MessageContext>) -> Self {
        Self {
            context,
            ..Self::new(Role::User, content)
        }
    }

    pub fn assistant(content: impl Into<String>, metadata: MessageMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::new(Role::Assistant, content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabChatContext {
    pub tab_id: i64,
    pub url: String,
    pub title: String,
    pub session_key: String,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_content: Option<PageContent>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl TabChatContext {
    pub fn key(&self) -> ContextKey {
        ContextKey::new(self.tab_id, self.session_key.clone())
    }
}
