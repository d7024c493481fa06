/// LLM service port trait
///
/// Defines the interface for the text-formatting providers.
/// Implementations: Qwen (DashScope), Gemini.
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model name (provider-specific)
    pub model: String,

    /// Temperature for generation (0.0 to 1.0)
    pub temperature: Option<f32>,

    /// Maximum tokens in response
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: Some(0.3), // Lower temperature keeps the formatter literal
            max_tokens: Some(8192),
        }
    }
}

/// Port trait for LLM services
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Generate text for a fully assembled prompt
    async fn generate(&self, prompt: &str, config: &LlmConfig) -> Result<String>;

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Check if the service is configured (has API key)
    fn is_configured(&self) -> bool;
}
