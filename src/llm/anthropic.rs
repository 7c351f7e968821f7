use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::error::{ProviderError, extract_error_message};
use super::models::resolve_model;
use super::pricing::calculate_cost;
use super::{
    GenerationRequest, GenerationResult, Provider, ProviderId, TokenUsage, endpoint_of,
    estimate_tokens,
};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

// The Messages API rejects requests without max_tokens.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, base_url: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResult, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.expose_secret())
                .map_err(|_| ProviderError::Unauthorized("API key is not a valid header".into()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let model = resolve_model(ProviderId::Anthropic, &req.model);
        let body = AnthropicRequest {
            model: &model,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: req.temperature,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &req.prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .headers(headers)
            .timeout(req.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                status,
                extract_error_message(&error_body),
            ));
        }

        let raw = response.text().await?;
        let resp: AnthropicResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Unknown(format!("malformed anthropic response: {e}")))?;

        let content = resp
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let usage = match resp.usage {
            Some(u) => TokenUsage::new(u.input_tokens, u.output_tokens),
            None => TokenUsage::new(estimate_tokens(&req.prompt), estimate_tokens(&content)),
        };
        let cost_usd = calculate_cost(ProviderId::Anthropic, &model, &usage);

        Ok(GenerationResult {
            content,
            provider: ProviderId::Anthropic,
            model: resp.model,
            usage,
            cost_usd,
            finish_reason: resp.stop_reason.unwrap_or_default(),
        })
    }

    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn endpoint(&self) -> (String, u16) {
        endpoint_of(ProviderId::Anthropic, &self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = AnthropicRequest {
            model: "claude-3-sonnet-20240229",
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.2,
            messages: vec![AnthropicMessage {
                role: "user",
                content: "hello",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["messages"][0]["content"], "hello");
        assert!(json.get("system").is_none());
    }

    #[test]
    fn test_base_url_trimmed() {
        let p = AnthropicProvider::new(SecretString::from("sk-ant"), Some("http://127.0.0.1:8081/"));
        assert_eq!(p.base_url, "http://127.0.0.1:8081");
        assert_eq!(p.id(), ProviderId::Anthropic);
        assert_eq!(p.endpoint(), ("127.0.0.1".to_string(), 8081));
    }
}
