//! Boundary to the model-invocation subsystem.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Pluggable model backend. The engine only ever sends a prompt with
/// sampling hints and reads back text plus telemetry; providers, transport,
/// and credentials live behind this trait.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, prompt: &str, hints: GenerationHints) -> Result<ModelResponse>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationHints {
    pub temperature: f32,
}

impl Default for GenerationHints {
    fn default() -> Self {
        Self { temperature: 0.1 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Per-call generation telemetry, forwarded to the caller for persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub model: String,
    pub duration_ms: u64,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug)]
pub struct ModelResponse {
    pub text: String,
    pub info: GenerationInfo,
}
