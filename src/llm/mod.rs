pub mod cloud;
pub mod error;
pub mod gateway;
pub mod local;
pub mod models;
pub mod provider;
pub mod tokens;
pub mod types;

pub use cloud::CloudProvider;
pub use error::GatewayError;
pub use gateway::{ModelGateway, ProviderSelection};
pub use local::LocalFallbackProvider;
pub use models::ModelConfig;
pub use provider::{ModelProvider, TextStream};
pub use types::{GenerationRequest, GenerationResponse, TokenUsage};
