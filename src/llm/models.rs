use std::collections::HashMap;
use std::sync::LazyLock;

use super::ProviderId;

static OPENAI_MODELS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    HashMap::from([
        ("gpt-4-turbo", "gpt-4-turbo-preview"),
        ("gpt-4-turbo-preview", "gpt-4-turbo-preview"),
        ("gpt-4", "gpt-4"),
        ("gpt-3.5-turbo", "gpt-3.5-turbo"),
    ])
});

static ANTHROPIC_MODELS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    HashMap::from([
        ("claude-3-opus", "claude-3-opus-20240229"),
        ("anthropic/claude-3-opus-20240229", "claude-3-opus-20240229"),
        ("claude-3-sonnet", "claude-3-sonnet-20240229"),
        ("anthropic/claude-3-sonnet-20240229", "claude-3-sonnet-20240229"),
        ("claude-3-haiku", "claude-3-haiku-20240307"),
        ("anthropic/claude-3-haiku-20240307", "claude-3-haiku-20240307"),
    ])
});

static FIREWORKS_MODELS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    HashMap::from([
        ("deepseek-r1-basic", "accounts/fireworks/models/deepseek-r1-basic"),
        (
            "fireworks_ai/accounts/fireworks/models/deepseek-r1-basic",
            "accounts/fireworks/models/deepseek-r1-basic",
        ),
        ("deepseek-chat", "accounts/fireworks/models/deepseek-v3"),
    ])
});

fn table(provider: ProviderId) -> &'static HashMap<&'static str, &'static str> {
    match provider {
        ProviderId::OpenAi => &OPENAI_MODELS,
        ProviderId::Anthropic => &ANTHROPIC_MODELS,
        ProviderId::Fireworks => &FIREWORKS_MODELS,
    }
}

/// Map a caller-facing alias to the provider's wire model string. Unknown aliases are
/// passed through so newly released models work without a table update.
pub fn resolve_model(provider: ProviderId, alias: &str) -> String {
    let alias = alias.trim();
    table(provider)
        .get(alias)
        .map(|wire| (*wire).to_string())
        .unwrap_or_else(|| alias.to_string())
}

pub fn default_model(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::OpenAi => "gpt-4-turbo-preview",
        ProviderId::Anthropic => "claude-3-sonnet-20240229",
        ProviderId::Fireworks => "accounts/fireworks/models/deepseek-r1-basic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_aliases() {
        assert_eq!(
            resolve_model(ProviderId::OpenAi, "gpt-4-turbo"),
            "gpt-4-turbo-preview"
        );
        assert_eq!(
            resolve_model(ProviderId::Anthropic, "anthropic/claude-3-haiku-20240307"),
            "claude-3-haiku-20240307"
        );
        assert_eq!(
            resolve_model(ProviderId::Fireworks, "deepseek-r1-basic"),
            "accounts/fireworks/models/deepseek-r1-basic"
        );
    }

    #[test]
    fn test_unknown_alias_passes_through() {
        assert_eq!(resolve_model(ProviderId::OpenAi, "gpt-5-preview"), "gpt-5-preview");
        assert_eq!(
            resolve_model(ProviderId::Anthropic, "claude-sonnet-4-5"),
            "claude-sonnet-4-5"
        );
    }

    #[test]
    fn test_tables_are_provider_scoped() {
        // An Anthropic alias means nothing to OpenAI.
        assert_eq!(resolve_model(ProviderId::OpenAi, "claude-3-opus"), "claude-3-opus");
    }

    #[test]
    fn test_defaults_resolve_to_themselves() {
        for provider in ProviderId::DEFAULT_ORDER {
            let model = default_model(provider);
            assert_eq!(resolve_model(provider, model), model);
        }
    }
}
