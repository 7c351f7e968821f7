use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use super::{ProviderId, TokenUsage};

/// USD per 1K tokens.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PriceEntry {
    pub provider: ProviderId,
    pub prompt: f64,
    pub completion: f64,
}

#[derive(Deserialize)]
struct PricingFile {
    models: HashMap<String, PriceEntry>,
}

fn price(provider: ProviderId, prompt: f64, completion: f64) -> PriceEntry {
    PriceEntry {
        provider,
        prompt,
        completion,
    }
}

pub fn builtin_prices() -> HashMap<String, PriceEntry> {
    HashMap::from([
        ("gpt-4-turbo-preview".to_string(), price(ProviderId::OpenAi, 0.01, 0.03)),
        ("gpt-4".to_string(), price(ProviderId::OpenAi, 0.03, 0.06)),
        ("gpt-3.5-turbo".to_string(), price(ProviderId::OpenAi, 0.0015, 0.002)),
        (
            "claude-3-opus-20240229".to_string(),
            price(ProviderId::Anthropic, 0.015, 0.075),
        ),
        (
            "claude-3-sonnet-20240229".to_string(),
            price(ProviderId::Anthropic, 0.003, 0.015),
        ),
        (
            "claude-3-haiku-20240307".to_string(),
            price(ProviderId::Anthropic, 0.00025, 0.00125),
        ),
        (
            "accounts/fireworks/models/deepseek-r1-basic".to_string(),
            price(ProviderId::Fireworks, 0.0005, 0.001),
        ),
    ])
}

pub fn load_pricing_file(path: &Path) -> anyhow::Result<HashMap<String, PriceEntry>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading pricing file {}", path.display()))?;
    let parsed: PricingFile = serde_json::from_str(&data)
        .with_context(|| format!("parsing pricing file {}", path.display()))?;
    Ok(parsed.models)
}

pub static PRICING: LazyLock<HashMap<String, PriceEntry>> = LazyLock::new(|| {
    let mut table = builtin_prices();
    let path = std::env::var("PRICING_JSON_PATH").unwrap_or_default();
    if !path.is_empty() {
        match load_pricing_file(Path::new(&path)) {
            Ok(overrides) => {
                tracing::info!(path = %path, models = overrides.len(), "Loaded pricing overrides");
                table.extend(overrides);
            }
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "Ignoring unreadable pricing file");
            }
        }
    }
    table
});

pub fn calculate_cost_with(
    table: &HashMap<String, PriceEntry>,
    provider: ProviderId,
    model: &str,
    usage: &TokenUsage,
) -> f64 {
    match table.get(model) {
        Some(entry) if entry.provider == provider => {
            (f64::from(usage.prompt_tokens) / 1000.0 * entry.prompt)
                + (f64::from(usage.completion_tokens) / 1000.0 * entry.completion)
        }
        _ => 0.0,
    }
}

/// Estimated cost of a call. Models missing from the table cost nothing.
pub fn calculate_cost(provider: ProviderId, model: &str, usage: &TokenUsage) -> f64 {
    calculate_cost_with(&PRICING, provider, model, usage)
}
