use axum::{Json, extract::State};
use serde::Serialize;

use crate::AppState;
use crate::llm::ProviderId;

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub provider: ProviderId,
    pub configured: bool,
    pub default_model: String,
    pub primary: bool,
}

pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    let configured = state.llm_client.configured_providers();
    let providers = ProviderId::DEFAULT_ORDER
        .into_iter()
        .map(|id| ProviderInfo {
            provider: id,
            configured: configured.contains(&id),
            default_model: state.llm_client.default_model_for(id),
            primary: id == state.config.primary_provider,
        })
        .collect();
    Json(providers)
}
