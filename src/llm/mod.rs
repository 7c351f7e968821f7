pub mod anthropic;
pub mod cache;
pub mod client;
pub mod error;
pub mod models;
pub mod openai;
pub mod pricing;
pub mod recorder;
pub mod retry;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use cache::{CacheKey, ResponseCache};
pub use client::{GenerateParams, LlmClient};
pub use error::{ErrorKind, GenerateError, ProviderError, RetryError};
pub use recorder::{AttemptOutcome, MetricsRecorder};
pub use retry::RetryPolicy;

/// Remote text-generation backends the gateway knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    #[serde(alias = "deepseek")]
    Fireworks,
}

impl ProviderId {
    /// Fixed default order used for fallbacks.
    pub const DEFAULT_ORDER: [ProviderId; 3] =
        [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Fireworks];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Fireworks => "fireworks",
        }
    }

    pub fn server_address(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "api.openai.com",
            ProviderId::Anthropic => "api.anthropic.com",
            ProviderId::Fireworks => "api.fireworks.ai",
        }
    }

    /// Every other provider, in default order.
    pub fn default_fallbacks(&self) -> Vec<ProviderId> {
        Self::DEFAULT_ORDER
            .into_iter()
            .filter(|p| p != self)
            .collect()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" => Ok(ProviderId::Anthropic),
            "fireworks" | "deepseek" => Ok(ProviderId::Fireworks),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// One provider call's worth of input. Built per provider per `generate` call and never
/// mutated; `id` ties every recorded attempt back to this instance.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: Option<u32>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            model: model.into(),
            temperature,
            max_tokens,
            timeout,
            max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub content: String,
    pub provider: ProviderId,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub finish_reason: String,
}

/// A single backend. Implementations make exactly one outbound call per `generate` and
/// never retry; retries belong to [`RetryPolicy`].
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResult, ProviderError>;
    fn id(&self) -> ProviderId;

    /// Host and port this adapter actually sends requests to.
    fn endpoint(&self) -> (String, u16) {
        (self.id().server_address().to_string(), 443)
    }
}

/// Host and port of `base_url`, falling back to the vendor's public host when it does not parse.
pub fn endpoint_of(provider: ProviderId, base_url: &str) -> (String, u16) {
    let parsed = reqwest::Url::parse(base_url).ok();
    let host = parsed
        .as_ref()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| provider.server_address().to_string());
    let port = parsed
        .as_ref()
        .and_then(|u| u.port_or_known_default())
        .unwrap_or(443);
    (host, port)
}

/// Rough token count for text, used when a provider omits usage: ~4 chars per token.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}
