use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opentelemetry::trace::TraceContextExt;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::llm::{GenerateError, ProviderId};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerateError),

    #[error("Internal error: {0}")]
    #[allow(dead_code)]
    Internal(String),
}

/// One provider's entry in a 502 response body.
#[derive(Debug, Serialize)]
pub struct FailureDetail {
    pub provider: ProviderId,
    pub kind: &'static str,
    pub attempts: u32,
    pub exhausted: bool,
    pub message: String,
}

fn get_trace_id() -> Option<String> {
    let span = Span::current();
    let context = span.context();
    let span_ref = context.span();
    let span_context = span_ref.span_context();

    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Generation(GenerateError::InvalidParameters(_)) => StatusCode::BAD_REQUEST,
            AppError::Generation(GenerateError::AllProvidersExhausted { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn failures(&self) -> Option<Vec<FailureDetail>> {
        match self {
            AppError::Generation(GenerateError::AllProvidersExhausted { failures }) => Some(
                failures
                    .iter()
                    .map(|f| FailureDetail {
                        provider: f.provider,
                        kind: f.error.source_error().kind().as_str(),
                        attempts: f.error.attempts(),
                        exhausted: f.error.is_exhausted(),
                        message: f.error.source_error().to_string(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::Validation(msg) => msg.clone(),
            AppError::Generation(GenerateError::InvalidParameters(msg)) => msg.clone(),
            AppError::Generation(e) => {
                tracing::error!(error = %e, "Generation failed");
                e.to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "Internal server error".to_string()
            }
        };

        let mut body = json!({
            "error": error_message,
            "status": status.as_u16(),
        });
        if let Some(failures) = self.failures() {
            body["failures"] = json!(failures);
        }
        if let Some(trace_id) = get_trace_id() {
            body["trace_id"] = json!(trace_id);
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
