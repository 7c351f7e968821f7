use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::anthropic::AnthropicProvider;
use super::cache::{CacheKey, ResponseCache};
use super::error::{GenerateError, ProviderError, ProviderFailure, RetryError};
use super::models::{default_model, resolve_model};
use super::openai::OpenAiCompatibleProvider;
use super::recorder::{AttemptOutcome, MetricsRecorder};
use super::retry::RetryPolicy;
use super::{GenerationRequest, GenerationResult, Provider, ProviderId};
use crate::config::Config;
use crate::telemetry::metrics::{GEN_AI_FALLBACK_COUNT, GEN_AI_RETRY_COUNT, LLM_CACHE_LOOKUPS};

/// Caller-facing parameters for one `generate` call. Unset values take the client defaults.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub prompt: String,
    pub provider: ProviderId,
    pub fallback_providers: Option<Vec<ProviderId>>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_attempts: Option<u32>,
}

impl GenerateParams {
    pub fn new(prompt: impl Into<String>, provider: ProviderId) -> Self {
        Self {
            prompt: prompt.into(),
            provider,
            fallback_providers: None,
            model: None,
            temperature: None,
            max_tokens: None,
            max_attempts: None,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<ProviderId>) -> Self {
        self.fallback_providers = Some(fallbacks);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Routes a prompt through the primary provider and then each fallback in order, with
/// retries per provider, response caching and per-attempt metrics.
///
/// Only providers with credentials are registered; anything else is skipped when the
/// attempt order is built and never sees a network call.
pub struct LlmClient {
    providers: BTreeMap<ProviderId, Arc<dyn Provider>>,
    default_models: BTreeMap<ProviderId, String>,
    retry: RetryPolicy,
    cache: ResponseCache,
    metrics: MetricsRecorder,
    default_temperature: f32,
    default_max_tokens: Option<u32>,
    request_timeout: Duration,
}

impl LlmClient {
    pub fn new(retry: RetryPolicy, cache_capacity: usize) -> Self {
        Self {
            providers: BTreeMap::new(),
            default_models: BTreeMap::new(),
            retry,
            cache: ResponseCache::new(cache_capacity),
            metrics: MetricsRecorder::default(),
            default_temperature: 0.7,
            default_max_tokens: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let retry = RetryPolicy::new(config.max_attempts, config.retry_base_delay)
            .with_jitter(config.retry_jitter);
        let mut client = Self::new(retry, config.cache_capacity).with_defaults(
            config.default_temperature,
            config.default_max_tokens,
            config.request_timeout,
        );

        for (&id, settings) in &config.providers {
            client = client.with_default_model(id, settings.default_model.clone());

            let Some(api_key) = settings.api_key.clone() else {
                tracing::info!(provider = %id, "No API key configured, provider disabled");
                continue;
            };
            let base_url = settings.base_url.as_deref();
            let provider: Arc<dyn Provider> = match id {
                ProviderId::OpenAi => Arc::new(OpenAiCompatibleProvider::openai(api_key, base_url)),
                ProviderId::Anthropic => Arc::new(AnthropicProvider::new(api_key, base_url)),
                ProviderId::Fireworks => {
                    Arc::new(OpenAiCompatibleProvider::fireworks(api_key, base_url))
                }
            };
            client = client.with_provider(provider);
        }

        client
    }

    /// Register a provider under its own id, replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    pub fn with_default_model(mut self, id: ProviderId, model: impl Into<String>) -> Self {
        self.default_models.insert(id, model.into());
        self
    }

    pub fn with_defaults(
        mut self,
        temperature: f32,
        max_tokens: Option<u32>,
        request_timeout: Duration,
    ) -> Self {
        self.default_temperature = temperature;
        self.default_max_tokens = max_tokens;
        self.request_timeout = request_timeout;
        self
    }

    /// Credentialed providers, in default order.
    pub fn configured_providers(&self) -> Vec<ProviderId> {
        ProviderId::DEFAULT_ORDER
            .into_iter()
            .filter(|id| self.providers.contains_key(id))
            .collect()
    }

    pub fn default_model_for(&self, id: ProviderId) -> String {
        self.default_models
            .get(&id)
            .cloned()
            .unwrap_or_else(|| default_model(id).to_string())
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Primary first, then the fallbacks (or every other provider in default order), with
    /// duplicates and uncredentialed providers removed.
    fn attempt_order(
        &self,
        primary: ProviderId,
        fallbacks: Option<&[ProviderId]>,
    ) -> Vec<ProviderId> {
        let fallbacks = match fallbacks {
            Some(list) => list.to_vec(),
            None => primary.default_fallbacks(),
        };

        let mut order = Vec::with_capacity(fallbacks.len() + 1);
        for id in std::iter::once(primary).chain(fallbacks) {
            if order.contains(&id) {
                continue;
            }
            if !self.providers.contains_key(&id) {
                tracing::debug!(provider = %id, "Skipping provider without credentials");
                continue;
            }
            order.push(id);
        }
        order
    }

    pub async fn generate(&self, params: GenerateParams) -> Result<GenerationResult, GenerateError> {
        let temperature = params.temperature.unwrap_or(self.default_temperature);
        let max_tokens = params.max_tokens.or(self.default_max_tokens);
        validate(&params.prompt, temperature, max_tokens)?;

        let primary_model = match params.model.as_deref() {
            Some(alias) if !alias.trim().is_empty() => resolve_model(params.provider, alias),
            _ => self.default_model_for(params.provider),
        };

        let key = CacheKey::new(
            params.provider,
            &primary_model,
            &params.prompt,
            temperature,
            max_tokens,
        );
        if let Some(hit) = self.cache.get(&key) {
            LLM_CACHE_LOOKUPS.add(1, &[KeyValue::new("result", "hit")]);
            tracing::debug!(
                provider = %hit.provider,
                model = %hit.model,
                "Serving cached response"
            );
            return Ok(hit);
        }
        LLM_CACHE_LOOKUPS.add(1, &[KeyValue::new("result", "miss")]);

        let order = self.attempt_order(params.provider, params.fallback_providers.as_deref());
        let max_attempts = params.max_attempts.unwrap_or(self.retry.max_attempts).max(1);
        let mut failures: Vec<ProviderFailure> = Vec::new();

        for id in order {
            let Some(provider) = self.providers.get(&id) else {
                continue;
            };

            if let Some(previous) = failures.last() {
                tracing::warn!(
                    from_provider = %previous.provider,
                    to_provider = %id,
                    error = %previous.error,
                    "Provider failed, falling back"
                );
                GEN_AI_FALLBACK_COUNT.add(
                    1,
                    &[
                        KeyValue::new("from_provider", previous.provider.as_str()),
                        KeyValue::new("to_provider", id.as_str()),
                    ],
                );
            }

            let model = if id == params.provider {
                primary_model.clone()
            } else {
                self.default_model_for(id)
            };
            let req = GenerationRequest::new(
                params.prompt.clone(),
                model,
                temperature,
                max_tokens,
                self.request_timeout,
                max_attempts,
            );

            match self.generate_with_retry(provider.as_ref(), &req).await {
                Ok(result) => {
                    self.cache.put(key, result.clone());
                    return Ok(result);
                }
                Err(error) => failures.push(ProviderFailure { provider: id, error }),
            }
        }

        if failures.is_empty() {
            tracing::error!(
                primary_provider = %params.provider,
                "No provider with credentials available for request"
            );
        } else {
            tracing::error!(
                attempted = failures.len(),
                "All providers exhausted"
            );
        }
        Err(GenerateError::AllProvidersExhausted { failures })
    }

    pub async fn generate_with_retry(
        &self,
        provider: &dyn Provider,
        req: &GenerationRequest,
    ) -> Result<GenerationResult, RetryError> {
        self.retry
            .with_max_attempts(req.max_attempts)
            .execute(move |attempt| self.generate_once(provider, req, attempt))
            .await
    }

    /// A single attempt: bounded by the request timeout, traced and recorded.
    pub async fn generate_once(
        &self,
        provider: &dyn Provider,
        req: &GenerationRequest,
        attempt: u32,
    ) -> Result<GenerationResult, ProviderError> {
        let provider_id = provider.id();
        let (server_address, server_port) = provider.endpoint();
        let span_display_name = format!("gen_ai.chat {}", req.model);
        let timestamp = Utc::now();
        let start = Instant::now();

        let span = tracing::info_span!(
            "gen_ai.chat",
            otel.name = %span_display_name,
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = %provider_id,
            gen_ai.request.model = %req.model,
            server.address = %server_address,
            server.port = server_port as i64,
            gen_ai.request.temperature = req.temperature,
            gen_ai.request.max_tokens = tracing::field::Empty,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.usage.cost_usd = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            llm.request_id = %req.id,
            llm.attempt = attempt,
            otel.status_code = tracing::field::Empty,
            error.type = tracing::field::Empty,
        );
        if let Some(max_tokens) = req.max_tokens {
            span.record("gen_ai.request.max_tokens", i64::from(max_tokens));
        }

        span.add_event(
            "gen_ai.user.message",
            vec![KeyValue::new("gen_ai.prompt", truncate(&req.prompt, 1000))],
        );

        if attempt > 1 {
            GEN_AI_RETRY_COUNT.add(
                1,
                &[
                    KeyValue::new("gen_ai.provider.name", provider_id.as_str()),
                    KeyValue::new("gen_ai.request.model", req.model.clone()),
                ],
            );
        }

        let call = provider.generate(req).instrument(span.clone());
        let result = match tokio::time::timeout(req.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "no response within {}ms",
                req.timeout.as_millis()
            ))),
        };

        let latency = start.elapsed();

        match &result {
            Ok(resp) => {
                span.record("gen_ai.response.model", resp.model.as_str());
                span.record("gen_ai.usage.input_tokens", i64::from(resp.usage.prompt_tokens));
                span.record(
                    "gen_ai.usage.output_tokens",
                    i64::from(resp.usage.completion_tokens),
                );
                span.record("gen_ai.usage.cost_usd", resp.cost_usd);
                if !resp.finish_reason.is_empty() {
                    span.record("gen_ai.response.finish_reasons", resp.finish_reason.as_str());
                }
                span.add_event(
                    "gen_ai.assistant.message",
                    vec![KeyValue::new(
                        "gen_ai.completion",
                        truncate(&resp.content, 2000),
                    )],
                );

                self.metrics
                    .record(AttemptOutcome::succeeded(req, attempt, timestamp, latency, resp));
            }
            Err(err) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.type", err.kind().as_str());

                self.metrics.record(AttemptOutcome::failed(
                    req,
                    provider_id,
                    attempt,
                    timestamp,
                    latency,
                    err,
                ));
            }
        }

        result
    }
}

fn validate(prompt: &str, temperature: f32, max_tokens: Option<u32>) -> Result<(), GenerateError> {
    if prompt.trim().is_empty() {
        return Err(GenerateError::InvalidParameters(
            "prompt must not be empty".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&temperature) {
        return Err(GenerateError::InvalidParameters(format!(
            "temperature must be within [0, 1], got {temperature}"
        )));
    }
    if max_tokens == Some(0) {
        return Err(GenerateError::InvalidParameters(
            "max_tokens must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if i + c.len_utf8() > max {
            break;
        }
        end = i + c.len_utf8();
    }
    s[..end].to_string()
}
