use std::sync::Arc;

use crate::core::config::{AppConfig, AppPaths, ConfigService};
use crate::router::MessageRouter;
use crate::session::{ReportedTabs, SessionManager};
use crate::storage::{KvStore, SqliteStore};

pub mod error;

use error::InitializationError;

/// Shared state handed to every route and background task.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub app_config: AppConfig,
    pub store: Arc<dyn KvStore>,
    pub sessions: Arc<SessionManager>,
    pub tabs: Arc<ReportedTabs>,
    pub router: Arc<MessageRouter>,
}

impl AppState {
    /// Resolves paths, loads `config.yml` + secrets, opens the SQLite store
    /// and builds the message router from the stored settings.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        Self::initialize_with(Arc::new(AppPaths::new())).await
    }

    pub async fn initialize_with(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let app_config = config
            .app_config()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let store: Arc<dyn KvStore> = Arc::new(
            SqliteStore::new(paths.db_path.clone())
                .await
                .map_err(|e| InitializationError::Storage(e.into()))?,
        );

        Self::with_store(paths, config, app_config, store).await
    }

    /// Builds the state over an already opened store.
    pub async fn with_store(
        paths: Arc<AppPaths>,
        config: ConfigService,
        app_config: AppConfig,
        store: Arc<dyn KvStore>,
    ) -> Result<Arc<Self>, InitializationError> {
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            app_config.session.clone(),
        ));
        let tabs = Arc::new(ReportedTabs::new());
        let router = Arc::new(
            MessageRouter::new(store.clone(), sessions.clone(), tabs.clone(), &app_config)
                .await
                .map_err(|e| InitializationError::Router(e.into()))?,
        );

        Ok(Arc::new(AppState {
            paths,
            config,
            app_config,
            store,
            sessions,
            tabs,
            router,
        }))
    }
}
