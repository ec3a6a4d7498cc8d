//! Generative model abstraction.
//!
//! The bot only needs two things from a model backend: a text reply to a
//! conversation and, optionally, an image for a prompt. [`GeminiProvider`]
//! implements both against the Gemini REST API.

mod gemini;

pub use gemini::GeminiProvider;

use crate::session::Turn;
use async_trait::async_trait;

// ============================================================================
// Provider Trait
// ============================================================================

/// Interface to a generative model backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Produce a reply to `request.message` given the prior conversation.
    async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError>;

    /// Generate an image. `Ok(None)` means the model answered without one.
    async fn generate_image(&self, model: &str, prompt: &str)
        -> Result<Option<Vec<u8>>, ProviderError>;
}

/// Error from a provider.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{provider}:{model}] {message}")]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl From<ProviderError> for parley_common::Error {
    fn from(err: ProviderError) -> Self {
        Self::Upstream(err.message)
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// One chat completion request, built from a user's session.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Concrete model name, e.g. `gemini-2.5-flash`
    pub model: String,
    pub system_prompt: String,
    pub temperature: f64,
    /// Turns before the current message, oldest first
    pub history: Vec<Turn>,
    /// The new user message
    pub message: String,
}
