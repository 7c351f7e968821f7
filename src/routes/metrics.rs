use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    /// Include up to this many of the most recent attempt outcomes.
    pub recent: Option<usize>,
}

pub async fn get_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Json<Value> {
    let client = &state.llm_client;
    let mut body = json!({
        "metrics": client.metrics().snapshot(),
        "cache": client.cache().stats(),
    });

    if let Some(limit) = query.recent {
        let recent = client.metrics().recent();
        let skip = recent.len().saturating_sub(limit);
        body["recent"] = json!(recent[skip..]);
    }

    Json(body)
}
