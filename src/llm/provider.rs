use async_trait::async_trait;

use crate::core::errors::ApiError;

/// Seam between the answer pipeline and the external model service.
///
/// Both operations go over the network and may fail or time out; callers are
/// expected to degrade rather than surface these errors to end users.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "gemini")
    fn name(&self) -> &str;

    /// check if the provider is reachable
    async fn health_check(&self) -> Result<bool, ApiError>;

    /// single-prompt text generation
    async fn generate(&self, prompt: &str) -> Result<String, ApiError>;

    /// embed one text into a dense vector
    async fn embed(&self, input: &str) -> Result<Vec<f32>, ApiError>;
}
