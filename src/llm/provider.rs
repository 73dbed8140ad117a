use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::GatewayError;
use super::types::{GenerationRequest, GenerationResponse};

/// Stream of incremental text deltas. Dropping the receiver cancels the
/// producer at its next send.
pub type TextStream = mpsc::Receiver<Result<String, GatewayError>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// provider name (e.g. "openai", "local")
    fn name(&self) -> &str;

    /// single completion
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GatewayError>;

    /// incremental completion
    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, GatewayError>;
}
