pub mod app;
pub mod paths;
pub mod service;
pub mod settings;
pub mod validation;

pub use app::{AppConfig, GatewayConfig, RagConfig, ServerConfig};
pub use paths::AppPaths;
pub use service::ConfigService;
pub use settings::Settings;
