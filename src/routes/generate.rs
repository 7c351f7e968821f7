use axum::{Json, extract::State};
use serde::Deserialize;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::llm::{GenerateParams, GenerationResult, ProviderId};

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub prompt: String,
    pub provider: Option<ProviderId>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub fallback_providers: Option<Vec<ProviderId>>,
}

pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> AppResult<Json<GenerationResult>> {
    if body.prompt.trim().is_empty() {
        return Err(AppError::Validation("prompt must not be empty".into()));
    }

    let params = GenerateParams {
        prompt: body.prompt,
        provider: body.provider.unwrap_or(state.config.primary_provider),
        fallback_providers: body.fallback_providers,
        model: body.model,
        temperature: body.temperature,
        max_tokens: body.max_tokens,
        max_attempts: None,
    };

    tracing::info!(
        provider = %params.provider,
        prompt_chars = params.prompt.chars().count(),
        "Generation requested"
    );

    let result = state.llm_client.generate(params).await?;
    Ok(Json(result))
}
