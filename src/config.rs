use std::collections::BTreeMap;
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use secrecy::SecretString;
use serde::Deserialize;

use crate::llm::ProviderId;
use crate::llm::models::{default_model, resolve_model};

/// Credentials and defaults for one backend. A provider without an API key is unusable and
/// is left out of every attempt order.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub default_model: String,
}

impl ProviderSettings {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
    pub primary_provider: ProviderId,
    pub providers: BTreeMap<ProviderId, ProviderSettings>,
    pub default_temperature: f32,
    pub default_max_tokens: Option<u32>,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_jitter: bool,
    pub cache_capacity: usize,
    pub metrics_log_dir: PathBuf,
}

/// Shape of the optional secrets file (`LLM_SECRETS_PATH`).
#[derive(Debug, Default, Deserialize)]
pub struct SecretsFile {
    #[serde(default)]
    pub api_keys: SecretKeys,
    #[serde(default)]
    pub models: SecretModels,
}

#[derive(Debug, Default, Deserialize)]
pub struct SecretKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub fireworks: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SecretModels {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    #[serde(alias = "deepseek")]
    pub fireworks: Option<String>,
}

impl SecretsFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading secrets file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing secrets file {}", path.display()))
    }

    fn api_key(&self, provider: ProviderId) -> Option<&str> {
        match provider {
            ProviderId::OpenAi => self.api_keys.openai.as_deref(),
            ProviderId::Anthropic => self.api_keys.anthropic.as_deref(),
            ProviderId::Fireworks => self.api_keys.fireworks.as_deref(),
        }
    }

    fn model(&self, provider: ProviderId) -> Option<&str> {
        match provider {
            ProviderId::OpenAi => self.models.openai.as_deref(),
            ProviderId::Anthropic => self.models.anthropic.as_deref(),
            ProviderId::Fireworks => self.models.fireworks.as_deref(),
        }
    }
}

fn env_prefix(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::OpenAi => "OPENAI",
        ProviderId::Anthropic => "ANTHROPIC",
        ProviderId::Fireworks => "FIREWORKS",
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key} has invalid value {raw:?}: {e}")),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source. Missing API keys are not an error; malformed
    /// numbers are.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let secrets = match non_empty(lookup("LLM_SECRETS_PATH")) {
            Some(path) => SecretsFile::load(Path::new(&path))?,
            None => SecretsFile::default(),
        };

        let mut providers = BTreeMap::new();
        for provider in ProviderId::DEFAULT_ORDER {
            let prefix = env_prefix(provider);
            let api_key = non_empty(lookup(&format!("{prefix}_API_KEY")))
                .or_else(|| non_empty(secrets.api_key(provider).map(str::to_string)))
                .map(SecretString::from);
            let model = non_empty(lookup(&format!("{prefix}_MODEL")))
                .or_else(|| non_empty(secrets.model(provider).map(str::to_string)))
                .unwrap_or_else(|| default_model(provider).to_string());

            providers.insert(
                provider,
                ProviderSettings {
                    api_key,
                    base_url: non_empty(lookup(&format!("{prefix}_BASE_URL"))),
                    default_model: resolve_model(provider, &model),
                },
            );
        }

        let default_temperature: f32 = parse_or(&lookup, "DEFAULT_TEMPERATURE", 0.7)?;
        if !(0.0..=1.0).contains(&default_temperature) {
            return Err(anyhow!(
                "DEFAULT_TEMPERATURE must be within [0, 1], got {default_temperature}"
            ));
        }

        let default_max_tokens = match non_empty(lookup("DEFAULT_MAX_TOKENS")) {
            Some(raw) => {
                let n: u32 = raw
                    .parse()
                    .with_context(|| format!("DEFAULT_MAX_TOKENS has invalid value {raw:?}"))?;
                if n == 0 {
                    return Err(anyhow!("DEFAULT_MAX_TOKENS must be greater than zero"));
                }
                Some(n)
            }
            None => None,
        };

        Ok(Self {
            port: parse_or(&lookup, "APP_PORT", 8080)?,
            environment: non_empty(lookup("ENVIRONMENT"))
                .unwrap_or_else(|| "development".to_string()),
            otel_service_name: non_empty(lookup("OTEL_SERVICE_NAME"))
                .unwrap_or_else(|| "llm-gateway".to_string()),
            otel_exporter_endpoint: non_empty(lookup("OTEL_EXPORTER_OTLP_ENDPOINT"))
                .unwrap_or_else(|| "http://localhost:4317".to_string()),
            primary_provider: parse_or(&lookup, "LLM_PROVIDER", ProviderId::OpenAi)?,
            providers,
            default_temperature,
            default_max_tokens,
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 60)?),
            max_attempts: parse_or::<u32>(&lookup, "LLM_MAX_ATTEMPTS", 3)?.max(1),
            retry_base_delay: Duration::from_millis(parse_or(
                &lookup,
                "LLM_RETRY_BASE_DELAY_MS",
                1000,
            )?),
            retry_jitter: parse_or(&lookup, "LLM_RETRY_JITTER", true)?,
            cache_capacity: parse_or(&lookup, "LLM_CACHE_CAPACITY", 128)?,
            metrics_log_dir: PathBuf::from(
                non_empty(lookup("METRICS_LOG_DIR")).unwrap_or_else(|| "logs".to_string()),
            ),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn provider(&self, id: ProviderId) -> Option<&ProviderSettings> {
        self.providers.get(&id)
    }

    pub fn configured_providers(&self) -> Vec<ProviderId> {
        self.providers
            .iter()
            .filter(|(_, settings)| settings.is_configured())
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_any_keys() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.primary_provider, ProviderId::OpenAi);
        assert_eq!(config.default_temperature, 0.7);
        assert_eq!(config.default_max_tokens, None);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert!(config.retry_jitter);
        assert_eq!(config.cache_capacity, 128);
        assert!(config.configured_providers().is_empty());
        assert_eq!(
            config.provider(ProviderId::Anthropic).unwrap().default_model,
            "claude-3-sonnet-20240229"
        );
        assert!(!config.is_production());
    }

    #[test]
    fn test_keys_and_models_from_env() {
        let config = Config::from_lookup(lookup_from(&[
            ("ANTHROPIC_API_KEY", "sk-ant-123"),
            ("ANTHROPIC_MODEL", "claude-3-haiku"),
            ("FIREWORKS_API_KEY", "fw-456"),
            ("FIREWORKS_BASE_URL", "http://localhost:9000/v1"),
            ("OPENAI_API_KEY", "   "),
            ("LLM_PROVIDER", "deepseek"),
        ]))
        .unwrap();

        assert_eq!(
            config.configured_providers(),
            vec![ProviderId::Anthropic, ProviderId::Fireworks]
        );
        let anthropic = config.provider(ProviderId::Anthropic).unwrap();
        assert_eq!(anthropic.api_key.as_ref().unwrap().expose_secret(), "sk-ant-123");
        assert_eq!(anthropic.default_model, "claude-3-haiku-20240307");
        assert_eq!(
            config.provider(ProviderId::Fireworks).unwrap().base_url.as_deref(),
            Some("http://localhost:9000/v1")
        );
        assert_eq!(config.primary_provider, ProviderId::Fireworks);
    }

    #[test]
    fn test_debug_output_redacts_keys() {
        let config =
            Config::from_lookup(lookup_from(&[("OPENAI_API_KEY", "sk-very-secret")])).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
    }

    #[test]
    fn test_secrets_file_fills_gaps() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[api_keys]
openai = "sk-from-file"
fireworks = "fw-from-file"

[models]
deepseek = "deepseek-r1-basic"
"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = Config::from_lookup(lookup_from(&[
            ("LLM_SECRETS_PATH", path.as_str()),
            ("OPENAI_API_KEY", "sk-from-env"),
        ]))
        .unwrap();

        let openai = config.provider(ProviderId::OpenAi).unwrap();
        assert_eq!(openai.api_key.as_ref().unwrap().expose_secret(), "sk-from-env");
        let fireworks = config.provider(ProviderId::Fireworks).unwrap();
        assert_eq!(fireworks.api_key.as_ref().unwrap().expose_secret(), "fw-from-file");
        assert_eq!(
            fireworks.default_model,
            "accounts/fireworks/models/deepseek-r1-basic"
        );
        assert!(!config.provider(ProviderId::Anthropic).unwrap().is_configured());
    }

    #[test]
    fn test_missing_secrets_file_is_an_error() {
        let result = Config::from_lookup(lookup_from(&[(
            "LLM_SECRETS_PATH",
            "/nonexistent/secrets.toml",
        )]));
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_numbers_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("APP_PORT", "eighty")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("LLM_MAX_ATTEMPTS", "-1")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DEFAULT_MAX_TOKENS", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DEFAULT_TEMPERATURE", "1.5")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("LLM_PROVIDER", "mistral")])).is_err());
    }

    #[test]
    fn test_retry_and_cache_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("LLM_MAX_ATTEMPTS", "5"),
            ("LLM_RETRY_BASE_DELAY_MS", "250"),
            ("LLM_RETRY_JITTER", "false"),
            ("LLM_CACHE_CAPACITY", "16"),
            ("DEFAULT_MAX_TOKENS", "512"),
            ("ENVIRONMENT", "production"),
        ]))
        .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_base_delay, Duration::from_millis(250));
        assert!(!config.retry_jitter);
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.default_max_tokens, Some(512));
        assert!(config.is_production());
    }
}
