//! Local inference service ports.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// A synchronous generate call.
#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    /// Raw image bytes; encoded by the adapter
    pub images: Vec<Vec<u8>>,
    pub stream: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InferenceResponse {
    pub model: String,
    pub text: String,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, request: InferenceRequest) -> DomainResult<InferenceResponse>;
}

/// Loads and unloads models as resource classes become busy or idle.
#[async_trait]
pub trait ModelResidency: Send + Sync {
    async fn warm(&self, model: &str) -> DomainResult<()>;

    async fn unload(&self, model: &str) -> DomainResult<()>;
}
