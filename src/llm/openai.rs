use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::error::{ProviderError, extract_error_message};
use super::models::resolve_model;
use super::pricing::calculate_cost;
use super::{
    GenerationRequest, GenerationResult, Provider, ProviderId, TokenUsage, endpoint_of,
    estimate_tokens,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const FIREWORKS_BASE_URL: &str = "https://api.fireworks.ai/inference/v1";

/// Chat-completions adapter for OpenAI and every backend that speaks its wire format.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    id: ProviderId,
    base_url: String,
    api_key: SecretString,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: ProviderId, api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            id,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn openai(api_key: SecretString, base_url: Option<&str>) -> Self {
        Self::new(
            ProviderId::OpenAi,
            api_key,
            base_url.unwrap_or(OPENAI_BASE_URL),
        )
    }

    pub fn fireworks(api_key: SecretString, base_url: Option<&str>) -> Self {
        Self::new(
            ProviderId::Fireworks,
            api_key,
            base_url.unwrap_or(FIREWORKS_BASE_URL),
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait::async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResult, ProviderError> {
        let model = resolve_model(self.id, &req.model);
        let body = ChatRequest {
            model: &model,
            messages: vec![ChatMessage {
                role: "user",
                content: &req.prompt,
            }],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
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
        let resp: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Unknown(format!("malformed {} response: {e}", self.id)))?;

        let choice = resp.choices.into_iter().next();
        let finish_reason = choice
            .as_ref()
            .and_then(|c| c.finish_reason.clone())
            .unwrap_or_default();
        let content = choice.and_then(|c| c.message.content).unwrap_or_default();

        let usage = match resp.usage {
            Some(u) => TokenUsage::new(u.prompt_tokens, u.completion_tokens),
            None => TokenUsage::new(estimate_tokens(&req.prompt), estimate_tokens(&content)),
        };
        // Priced by the requested model; providers echo dated snapshots the rate table lacks.
        let cost_usd = calculate_cost(self.id, &model, &usage);
        let model = resp.model.unwrap_or(model);

        Ok(GenerationResult {
            content,
            provider: self.id,
            model,
            usage,
            cost_usd,
            finish_reason,
        })
    }

    fn id(&self) -> ProviderId {
        self.id
    }

    fn endpoint(&self) -> (String, u16) {
        endpoint_of(self.id, &self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_omits_absent_max_tokens() {
        let body = ChatRequest {
            model: "gpt-4",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.5,
            max_tokens: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_constructors_pick_identity_and_base() {
        let openai = OpenAiCompatibleProvider::openai(SecretString::from("sk-test"), None);
        assert_eq!(openai.id(), ProviderId::OpenAi);
        assert_eq!(openai.base_url, OPENAI_BASE_URL);

        let fireworks = OpenAiCompatibleProvider::fireworks(
            SecretString::from("fw-test"),
            Some("http://localhost:9000/v1/"),
        );
        assert_eq!(fireworks.id(), ProviderId::Fireworks);
        assert_eq!(fireworks.base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn test_endpoint_reflects_base_url_override() {
        let openai = OpenAiCompatibleProvider::openai(SecretString::from("sk-test"), None);
        assert_eq!(openai.endpoint(), ("api.openai.com".to_string(), 443));

        let local = OpenAiCompatibleProvider::openai(
            SecretString::from("sk-test"),
            Some("http://localhost:9000/v1"),
        );
        assert_eq!(local.endpoint(), ("localhost".to_string(), 9000));
    }
}
