use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use super::{ChatMessage, ContextKey, SessionLimits, TabChatContext, TabRegistry};
use crate::core::errors::ApiError;
use crate::page::PageContent;
use crate::storage::{self, KvStore, KEY_TAB_CONTEXTS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub contexts: usize,
    pub tabs: usize,
}

/// Session records persisted as one array under `tabChatContexts`.
///
/// Every mutation is a read-modify-write of the whole array. There is no
/// locking across calls: concurrent writers to the same store race and the
/// later write wins.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn KvStore>,
    limits: SessionLimits,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KvStore>, limits: SessionLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    async fn load_all(&self) -> Result<HashMap<ContextKey, TabChatContext>, ApiError> {
        let records: Vec<TabChatContext> = storage::load(self.store.as_ref(), KEY_TAB_CONTEXTS)
            .await?
            .unwrap_or_default();
        Ok(records.into_iter().map(|ctx| (ctx.key(), ctx)).collect())
    }

    async fn persist(&self, contexts: HashMap<ContextKey, TabChatContext>) -> Result<(), ApiError> {
        let mut records: Vec<TabChatContext> = contexts.into_values().collect();
        records.sort_by(|a, b| (a.tab_id, &a.session_key).cmp(&(b.tab_id, &b.session_key)));
        storage::save(self.store.as_ref(), KEY_TAB_CONTEXTS, &records).await
    }

    /// Returns the session for `(tab_id, session_key)` if it was created for
    /// `url`, refreshing its access time.
    pub async fn get(
        &self,
        tab_id: i64,
        url: &str,
        session_key: &str,
    ) -> Result<Option<TabChatContext>, ApiError> {
        let mut contexts = self.load_all().await?;
        let key = ContextKey::new(tab_id, session_key);

        let Some(context) = contexts.get_mut(&key) else {
            return Ok(None);
        };
        if context.url != url {
            tracing::debug!(
                "Ignoring stale session for tab {} (stored url {}, requested {})",
                tab_id,
                context.url,
                url
            );
            return Ok(None);
        }

        context.last_accessed_at = Utc::now();
        let found = context.clone();
        self.persist(contexts).await?;
        Ok(Some(found))
    }

    /// Creates or wholesale replaces the session record.
    pub async fn save(
        &self,
        tab_id: i64,
        url: &str,
        title: &str,
        session_key: &str,
        chat_history: &[ChatMessage],
        page_content: Option<PageContent>,
    ) -> Result<TabChatContext, ApiError> {
        let mut contexts = self.load_all().await?;
        let now = Utc::now();
        let context = TabChatContext {
            tab_id,
            url: url.to_string(),
            title: title.to_string(),
            session_key: session_key.to_string(),
            chat_history: chat_history.to_vec(),
            page_content,
            created_at: now,
            last_accessed_at: now,
        };
        contexts.insert(context.key(), context.clone());
        self.persist(contexts).await?;
        Ok(context)
    }

    /// Replaces the transcript of an existing session. Returns `false`
    /// without writing when the session does not exist.
    pub async fn update_history(
        &self,
        tab_id: i64,
        session_key: &str,
        chat_history: &[ChatMessage],
    ) -> Result<bool, ApiError> {
        let mut contexts = self.load_all().await?;
        let key = ContextKey::new(tab_id, session_key);

        let Some(context) = contexts.get_mut(&key) else {
            return Ok(false);
        };
        context.chat_history = chat_history.to_vec();
        context.last_accessed_at = Utc::now();
        self.persist(contexts).await?;
        Ok(true)
    }

    /// Removes one session, or every session of the tab when `session_key`
    /// is `None`. Returns how many records were dropped.
    pub async fn remove(&self, tab_id: i64, session_key: Option<&str>) -> Result<usize, ApiError> {
        let mut contexts = self.load_all().await?;
        let before = contexts.len();

        match session_key {
            Some(session_key) => {
                contexts.remove(&ContextKey::new(tab_id, session_key));
            }
            None => contexts.retain(|key, _| key.tab_id != tab_id),
        }

        let removed = before - contexts.len();
        if removed > 0 {
            self.persist(contexts).await?;
        }
        Ok(removed)
    }

    pub async fn cleanup_by_age(&self) -> Result<usize, ApiError> {
        self.cleanup_by_age_at(Utc::now()).await
    }

    /// Drops sessions idle for longer than `max_age`, then keeps only the
    /// `max_contexts` most recently accessed survivors.
    pub async fn cleanup_by_age_at(&self, now: DateTime<Utc>) -> Result<usize, ApiError> {
        let contexts = self.load_all().await?;
        let before = contexts.len();
        let max_age = ChronoDuration::from_std(self.limits.max_age).map_err(ApiError::internal)?;

        let mut survivors: Vec<TabChatContext> = contexts
            .into_values()
            .filter(|ctx| now.signed_duration_since(ctx.last_accessed_at) <= max_age)
            .collect();
        survivors.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        survivors.truncate(self.limits.max_contexts);

        let removed = before - survivors.len();
        if removed > 0 {
            tracing::info!("Evicted {} stale session(s), {} remain", removed, survivors.len());
            self.persist(survivors.into_iter().map(|ctx| (ctx.key(), ctx)).collect())
                .await?;
        }
        Ok(removed)
    }

    /// Drops sessions of tabs the host no longer reports as open. Does
    /// nothing until the host has reported at least once.
    pub async fn cleanup_by_liveness(&self, registry: &dyn TabRegistry) -> Result<usize, ApiError> {
        match registry.open_tab_ids().await? {
            Some(open_tabs) => self.retain_open_tabs(&open_tabs).await,
            None => Ok(0),
        }
    }

    /// Drops sessions whose tab is not in `open_tabs`.
    pub async fn retain_open_tabs(&self, open_tabs: &HashSet<i64>) -> Result<usize, ApiError> {
        let mut contexts = self.load_all().await?;
        let before = contexts.len();
        contexts.retain(|key, _| open_tabs.contains(&key.tab_id));

        let removed = before - contexts.len();
        if removed > 0 {
            tracing::info!("Removed {} session(s) of closed tabs", removed);
            self.persist(contexts).await?;
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<SessionStats, ApiError> {
        let contexts = self.load_all().await?;
        let tabs: HashSet<i64> = contexts.keys().map(|key| key.tab_id).collect();
        Ok(SessionStats {
            contexts: contexts.len(),
            tabs: tabs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use crate::storage::MemoryStore;

    const URL: &str = "https://a.com/jobs/1";

    fn manager_with(limits: SessionLimits) -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()), limits)
    }

    fn manager() -> SessionManager {
        manager_with(SessionLimits::default())
    }

    fn message(text: &str) -> ChatMessage {
        ChatMessage::new(Role::User, text)
    }

    #[tokio::test]
    async fn same_navigation_returns_same_session() {
        let sessions = manager();
        let key = crate::session::session_key_for(URL, 1700).expect("key");
        sessions
            .save(7, URL, "Job", &key, &[message("hello")], None)
            .await
            .expect("save");

        let same_key = crate::session::session_key_for(URL, 1700).expect("key");
        let first = sessions.get(7, URL, &same_key).await.expect("get").expect("hit");
        let second = sessions.get(7, URL, &same_key).await.expect("get").expect("hit");

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.chat_history.len(), 1);
        assert!(second.last_accessed_at >= first.last_accessed_at);
    }

    #[tokio::test]
    async fn url_mismatch_is_a_miss() {
        let sessions = manager();
        sessions.save(1, URL, "Job", "k", &[], None).await.expect("save");
        assert!(sessions
            .get(1, "https://a.com/jobs/2", "k")
            .await
            .expect("get")
            .is_none());
        assert!(sessions.get(2, URL, "k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn sessions_of_one_tab_are_isolated() {
        let sessions = manager();
        sessions.save(1, URL, "Job", "first", &[message("a")], None).await.expect("save");
        sessions.save(1, URL, "Job", "second", &[message("b")], None).await.expect("save");

        let updated = sessions
            .update_history(1, "first", &[message("a"), message("a2")])
            .await
            .expect("update");
        assert!(updated);

        let first = sessions.get(1, URL, "first").await.expect("get").expect("hit");
        let second = sessions.get(1, URL, "second").await.expect("get").expect("hit");
        assert_eq!(first.chat_history.len(), 2);
        assert_eq!(second.chat_history.len(), 1);
        assert_eq!(second.chat_history[0].content, "b");
    }

    #[tokio::test]
    async fn update_history_on_missing_session_is_a_no_op() {
        let sessions = manager();
        let updated = sessions
            .update_history(9, "nope", &[message("x")])
            .await
            .expect("update");
        assert!(!updated);
        assert_eq!(sessions.stats().await.expect("stats").contexts, 0);
    }

    #[tokio::test]
    async fn remove_by_key_or_whole_tab() {
        let sessions = manager();
        sessions.save(1, URL, "Job", "a", &[], None).await.expect("save");
        sessions.save(1, URL, "Job", "b", &[], None).await.expect("save");
        sessions.save(2, URL, "Job", "a", &[], None).await.expect("save");

        assert_eq!(sessions.remove(1, Some("a")).await.expect("remove"), 1);
        assert_eq!(sessions.remove(1, Some("a")).await.expect("remove"), 0);
        assert_eq!(sessions.remove(1, None).await.expect("remove"), 1);

        let stats = sessions.stats().await.expect("stats");
        assert_eq!(stats, SessionStats { contexts: 1, tabs: 1 });
    }

    #[tokio::test]
    async fn cleanup_by_age_drops_idle_sessions_and_caps_count() {
        let sessions = manager_with(SessionLimits {
            max_contexts: 2,
            ..SessionLimits::default()
        });
        for (tab, key) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            sessions.save(tab, URL, "Job", key, &[], None).await.expect("save");
        }

        // Rewrite access times: tab 1 is two days old, the rest are staggered.
        let now = Utc::now();
        let mut contexts = sessions.load_all().await.expect("load");
        for ctx in contexts.values_mut() {
            ctx.last_accessed_at = match ctx.tab_id {
                1 => now - ChronoDuration::hours(48),
                2 => now - ChronoDuration::minutes(30),
                3 => now - ChronoDuration::minutes(10),
                _ => now - ChronoDuration::minutes(20),
            };
        }
        sessions.persist(contexts).await.expect("persist");

        let removed = sessions.cleanup_by_age_at(now).await.expect("cleanup");
        assert_eq!(removed, 2);

        let remaining = sessions.load_all().await.expect("load");
        let mut tabs: Vec<i64> = remaining.keys().map(|k| k.tab_id).collect();
        tabs.sort();
        assert_eq!(tabs, vec![3, 4]);
        for ctx in remaining.values() {
            assert!(now - ctx.last_accessed_at <= ChronoDuration::hours(24));
        }

        // Idempotent.
        assert_eq!(sessions.cleanup_by_age_at(now).await.expect("cleanup"), 0);
    }

    #[tokio::test]
    async fn retain_open_tabs_drops_closed_tabs() {
        let sessions = manager();
        sessions.save(1, URL, "Job", "a", &[], None).await.expect("save");
        sessions.save(2, URL, "Job", "b", &[], None).await.expect("save");

        let open: HashSet<i64> = [2].into_iter().collect();
        assert_eq!(sessions.retain_open_tabs(&open).await.expect("retain"), 1);
        assert!(sessions.get(1, URL, "a").await.expect("get").is_none());
        assert!(sessions.get(2, URL, "b").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn save_replaces_record_wholesale() {
        let sessions = manager();
        sessions.save(1, URL, "Old", "k", &[message("x")], None).await.expect("save");
        sessions.save(1, URL, "New", "k", &[], None).await.expect("save");

        let ctx = sessions.get(1, URL, "k").await.expect("get").expect("hit");
        assert_eq!(ctx.title, "New");
        assert!(ctx.chat_history.is_empty());
        assert_eq!(sessions.stats().await.expect("stats").contexts, 1);
    }
}
