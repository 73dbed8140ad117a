use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::SessionManager;
use crate::core::errors::ApiError;

/// Source of the set of currently open browser tabs.
#[async_trait]
pub trait TabRegistry: Send + Sync {
    /// `None` while the host has not told us anything yet.
    async fn open_tab_ids(&self) -> Result<Option<HashSet<i64>>, ApiError>;
}

/// Open tabs as last reported by the extension.
#[derive(Debug, Default)]
pub struct ReportedTabs {
    tabs: RwLock<Option<HashSet<i64>>>,
}

impl ReportedTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn report(&self, tab_ids: impl IntoIterator<Item = i64>) {
        let tabs: HashSet<i64> = tab_ids.into_iter().collect();
        tracing::debug!("Extension reported {} open tab(s)", tabs.len());
        *self.tabs.write().await = Some(tabs);
    }
}

#[async_trait]
impl TabRegistry for ReportedTabs {
    async fn open_tab_ids(&self) -> Result<Option<HashSet<i64>>, ApiError> {
        Ok(self.tabs.read().await.clone())
    }
}

/// Runs age and liveness eviction every `cleanup_interval`, starting
/// immediately.
pub fn spawn_cleanup_task(
    sessions: Arc<SessionManager>,
    registry: Arc<dyn TabRegistry>,
) -> JoinHandle<()> {
    let period = sessions.limits().cleanup_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = sessions.cleanup_by_age().await {
                tracing::error!("Session age cleanup failed: {}", e);
            }
            if let Err(e) = sessions.cleanup_by_liveness(registry.as_ref()).await {
                tracing::error!("Session liveness cleanup failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::SessionLimits;
    use crate::storage::MemoryStore;

    const URL: &str = "https://a.com/";

    #[tokio::test]
    async fn liveness_waits_for_first_report() {
        let sessions = SessionManager::new(Arc::new(MemoryStore::new()), SessionLimits::default());
        sessions.save(1, URL, "A", "k", &[], None).await.expect("save");

        let tabs = ReportedTabs::new();
        assert_eq!(sessions.cleanup_by_liveness(&tabs).await.expect("cleanup"), 0);

        tabs.report([2, 3]).await;
        assert_eq!(sessions.cleanup_by_liveness(&tabs).await.expect("cleanup"), 1);
        assert_eq!(sessions.stats().await.expect("stats").contexts, 0);
    }

    #[tokio::test]
    async fn cleanup_task_runs_on_startup() {
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemoryStore::new()),
            SessionLimits {
                max_contexts: 1,
                cleanup_interval: Duration::from_secs(3600),
                ..SessionLimits::default()
            },
        ));
        sessions.save(1, URL, "A", "a", &[], None).await.expect("save");
        sessions.save(2, URL, "B", "b", &[], None).await.expect("save");

        let handle = spawn_cleanup_task(sessions.clone(), Arc::new(ReportedTabs::new()));
        for _ in 0..50 {
            if sessions.stats().await.expect("stats").contexts == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(sessions.stats().await.expect("stats").contexts, 1);
    }
}
