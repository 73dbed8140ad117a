use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to open storage: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Failed to initialize message router: {0}")]
    Router(#[source] anyhow::Error),
}
