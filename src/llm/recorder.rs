use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::error::{ErrorKind, ProviderError};
use super::{GenerationRequest, GenerationResult, ProviderId, TokenUsage};
use crate::telemetry::metrics::{
    GEN_AI_COST, GEN_AI_ERROR_COUNT, GEN_AI_OPERATION_DURATION, GEN_AI_TOKEN_USAGE,
};

/// Tracing target for per-attempt records; the telemetry layer routes it to the rotating
/// metrics log.
pub const METRICS_TARGET: &str = "llm_metrics";

pub const DEFAULT_RECENT_CAPACITY: usize = 256;

/// One adapter invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptOutcome {
    pub request_id: Uuid,
    pub provider: ProviderId,
    pub model: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub usage: Option<TokenUsage>,
    pub cost_usd: f64,
}

impl AttemptOutcome {
    pub fn succeeded(
        req: &GenerationRequest,
        attempt: u32,
        timestamp: DateTime<Utc>,
        latency: Duration,
        result: &GenerationResult,
    ) -> Self {
        Self {
            request_id: req.id,
            provider: result.provider,
            model: req.model.clone(),
            attempt,
            timestamp,
            latency_ms: latency.as_secs_f64() * 1000.0,
            success: true,
            error_kind: None,
            error: None,
            usage: Some(result.usage),
            cost_usd: result.cost_usd,
        }
    }

    pub fn failed(
        req: &GenerationRequest,
        provider: ProviderId,
        attempt: u32,
        timestamp: DateTime<Utc>,
        latency: Duration,
        err: &ProviderError,
    ) -> Self {
        Self {
            request_id: req.id,
            provider,
            model: req.model.clone(),
            attempt,
            timestamp,
            latency_ms: latency.as_secs_f64() * 1000.0,
            success: false,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
            usage: None,
            cost_usd: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderTotals {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub total_latency_ms: f64,
}

impl ProviderTotals {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_latency_ms / self.attempts as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub total_attempts: u64,
    pub total_cost_usd: f64,
    pub providers: BTreeMap<ProviderId, ProviderTotals>,
}

#[derive(Default)]
struct State {
    totals: BTreeMap<ProviderId, ProviderTotals>,
    recent: VecDeque<AttemptOutcome>,
}

/// Sink for attempt outcomes: a structured log line, OpenTelemetry instruments and an
/// in-process aggregate. `record` swallows every failure so metrics can never mask a
/// generation result.
pub struct MetricsRecorder {
    state: Mutex<State>,
    recent_capacity: usize,
}

impl MetricsRecorder {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            recent_capacity: recent_capacity.max(1),
        }
    }

    pub fn record(&self, outcome: AttemptOutcome) {
        log_outcome(&outcome);
        export_outcome(&outcome);

        let mut state = self.state.lock();
        let totals = state.totals.entry(outcome.provider).or_default();
        totals.attempts += 1;
        totals.total_latency_ms += outcome.latency_ms;
        if outcome.success {
            totals.successes += 1;
        } else {
            totals.failures += 1;
        }
        if let Some(usage) = outcome.usage {
            totals.prompt_tokens += u64::from(usage.prompt_tokens);
            totals.completion_tokens += u64::from(usage.completion_tokens);
        }
        totals.cost_usd += outcome.cost_usd;

        if state.recent.len() == self.recent_capacity {
            state.recent.pop_front();
        }
        state.recent.push_back(outcome);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            total_attempts: state.totals.values().map(|t| t.attempts).sum(),
            total_cost_usd: state.totals.values().map(|t| t.cost_usd).sum(),
            providers: state.totals.clone(),
        }
    }

    /// Most recent outcomes, oldest first.
    pub fn recent(&self) -> Vec<AttemptOutcome> {
        self.state.lock().recent.iter().cloned().collect()
    }

    pub fn attempts_for(&self, provider: ProviderId) -> u64 {
        self.state
            .lock()
            .totals
            .get(&provider)
            .map(|t| t.attempts)
            .unwrap_or(0)
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

fn log_outcome(outcome: &AttemptOutcome) {
    match serde_json::to_string(outcome) {
        Ok(json) => tracing::info!(
            target: METRICS_TARGET,
            provider = %outcome.provider,
            model = %outcome.model,
            success = outcome.success,
            latency_ms = outcome.latency_ms,
            cost_usd = outcome.cost_usd,
            outcome = %json,
            "Request metrics"
        ),
        Err(err) => tracing::warn!(error = %err, "Failed to serialize attempt outcome"),
    }
}

fn export_outcome(outcome: &AttemptOutcome) {
    let op_kv = KeyValue::new("gen_ai.operation.name", "chat");
    let provider_kv = KeyValue::new("gen_ai.provider.name", outcome.provider.as_str());
    let model_kv = KeyValue::new("gen_ai.request.model", outcome.model.clone());

    GEN_AI_OPERATION_DURATION.record(
        outcome.latency_ms / 1000.0,
        &[op_kv.clone(), provider_kv.clone(), model_kv.clone()],
    );

    match (outcome.usage, outcome.error_kind) {
        (Some(usage), _) => {
            GEN_AI_TOKEN_USAGE.record(
                f64::from(usage.prompt_tokens),
                &[
                    KeyValue::new("gen_ai.token.type", "input"),
                    op_kv.clone(),
                    provider_kv.clone(),
                    model_kv.clone(),
                ],
            );
            GEN_AI_TOKEN_USAGE.record(
                f64::from(usage.completion_tokens),
                &[
                    KeyValue::new("gen_ai.token.type", "output"),
                    op_kv.clone(),
                    provider_kv.clone(),
                    model_kv.clone(),
                ],
            );
            GEN_AI_COST.add(outcome.cost_usd, &[op_kv, provider_kv, model_kv]);
        }
        (None, Some(kind)) => {
            GEN_AI_ERROR_COUNT.add(
                1,
                &[provider_kv, model_kv, KeyValue::new("error.type", kind.as_str())],
            );
        }
        (None, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new("prompt", "gpt-4", 0.7, None, Duration::from_secs(5), 3)
    }

    fn ok_result() -> GenerationResult {
        GenerationResult {
            content: "answer".into(),
            provider: ProviderId::OpenAi,
            model: "gpt-4".into(),
            usage: TokenUsage::new(100, 50),
            cost_usd: 0.006,
            finish_reason: "stop".into(),
        }
    }

    #[test]
    fn test_success_outcome_fields() {
        let req = request();
        let outcome = AttemptOutcome::succeeded(
            &req,
            1,
            Utc::now(),
            Duration::from_millis(250),
            &ok_result(),
        );
        assert_eq!(outcome.request_id, req.id);
        assert!(outcome.success);
        assert_eq!(outcome.latency_ms, 250.0);
        assert_eq!(outcome.usage.unwrap().total_tokens, 150);
        assert!(outcome.error_kind.is_none());
    }

    #[test]
    fn test_success_records_requested_model_not_echoed_snapshot() {
        let req = request();
        let result = GenerationResult {
            model: "gpt-4-0613".into(),
            ..ok_result()
        };
        let ok = AttemptOutcome::succeeded(&req, 1, Utc::now(), Duration::ZERO, &result);
        let failed = AttemptOutcome::failed(
            &req,
            ProviderId::OpenAi,
            1,
            Utc::now(),
            Duration::ZERO,
            &ProviderError::Timeout("t".into()),
        );
        assert_eq!(ok.model, "gpt-4");
        assert_eq!(ok.model, failed.model);
    }

    #[test]
    fn test_failure_outcome_fields() {
        let req = request();
        let err = ProviderError::RateLimited("429 slow down".into());
        let outcome = AttemptOutcome::failed(
            &req,
            ProviderId::Anthropic,
            2,
            Utc::now(),
            Duration::from_millis(10),
            &err,
        );
        assert!(!outcome.success);
        assert_eq!(outcome.provider, ProviderId::Anthropic);
        assert_eq!(outcome.attempt, 2);
        assert_eq!(outcome.error_kind, Some(ErrorKind::RateLimit));
        assert_eq!(outcome.cost_usd, 0.0);
    }

    #[test]
    fn test_aggregates_per_provider() {
        let recorder = MetricsRecorder::default();
        let req = request();
        let err = ProviderError::TransientNetwork("503".into());

        recorder.record(AttemptOutcome::failed(
            &req,
            ProviderId::OpenAi,
            1,
            Utc::now(),
            Duration::from_millis(100),
            &err,
        ));
        recorder.record(AttemptOutcome::succeeded(
            &req,
            2,
            Utc::now(),
            Duration::from_millis(300),
            &ok_result(),
        ));

        let snapshot = recorder.snapshot();
        let openai = &snapshot.providers[&ProviderId::OpenAi];
        assert_eq!(openai.attempts, 2);
        assert_eq!(openai.successes, 1);
        assert_eq!(openai.failures, 1);
        assert_eq!(openai.prompt_tokens, 100);
        assert_eq!(openai.completion_tokens, 50);
        assert_eq!(openai.avg_latency_ms(), 200.0);
        assert_eq!(snapshot.total_attempts, 2);
        assert!((snapshot.total_cost_usd - 0.006).abs() < 1e-12);
        assert_eq!(recorder.attempts_for(ProviderId::Fireworks), 0);
    }

    #[test]
    fn test_recent_ring_is_bounded() {
        let recorder = MetricsRecorder::new(3);
        let req = request();
        for attempt in 1..=5 {
            recorder.record(AttemptOutcome::failed(
                &req,
                ProviderId::OpenAi,
                attempt,
                Utc::now(),
                Duration::ZERO,
                &ProviderError::Timeout("t".into()),
            ));
        }
        let recent = recorder.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(
            recent.iter().map(|o| o.attempt).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert_eq!(recorder.attempts_for(ProviderId::OpenAi), 5);
    }

    #[test]
    fn test_snapshot_serializes_provider_keys() {
        let recorder = MetricsRecorder::default();
        recorder.record(AttemptOutcome::succeeded(
            &request(),
            1,
            Utc::now(),
            Duration::from_millis(1),
            &ok_result(),
        ));
        let json = serde_json::to_value(recorder.snapshot()).unwrap();
        assert_eq!(json["providers"]["openai"]["successes"], 1);
    }
}
