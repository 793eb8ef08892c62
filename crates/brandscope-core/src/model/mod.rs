pub mod catalog;
mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use scripted::{ScriptedClient, ScriptedOutcome};

/// Platform family a model belongs to. Search platforms can return real
/// citation URLs alongside their answer; chat platforms return text only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Search,
    Chat,
}

/// Static catalog entry for one model backend. Read-only, process-wide.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub platform: PlatformType,
    pub supports_grounding: bool,
    /// USD per million prompt tokens.
    pub price_in_per_mtok: f64,
    /// USD per million completion tokens.
    pub price_out_per_mtok: f64,
}

/// Token accounting reported by a model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
}

/// One citation URL returned by a search-capable platform, in the order the
/// platform listed it (`rank` is 1-based).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCitation {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    pub rank: usize,
}

/// Successful reply from a model backend, with its telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOutput {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<SourceCitation>,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub cost: f64,
}

/// Typed failure from a model backend. Captured into the owning cell's
/// `ModelResult.error`; never unwinds sibling calls.
#[derive(Debug, Clone, Error)]
pub enum ModelCallError {
    #[error("model call timed out")]
    Timeout,
    #[error("model call was rate limited")]
    RateLimited,
    #[error("provider error: {message}")]
    Provider { message: String },
    #[error("malformed provider response: {message}")]
    Malformed { message: String },
}

/// Capability seam for invoking one model backend. How a provider is
/// authenticated or spoken to lives entirely behind this trait.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Catalog entry describing this backend.
    fn descriptor(&self) -> &ModelDescriptor;

    /// Send one prompt and return the reply with its telemetry, or a typed
    /// failure.
    async fn complete(&self, prompt: &str) -> Result<ModelOutput, ModelCallError>;
}
