use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use super::ProviderId;

/// Failure of a single provider attempt. Adapters always return one of these, never a raw
/// transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Timeout,
    AuthError,
    InvalidRequest,
    NetworkError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RateLimited(_) => ErrorKind::RateLimit,
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::Unauthorized(_) => ErrorKind::AuthError,
            ProviderError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ProviderError::TransientNetwork(_) => ErrorKind::NetworkError,
            ProviderError::Unknown(_) => ErrorKind::UnknownError,
        }
    }

    /// `Unknown` reports retryable here; the retry loop caps it at one retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::Unauthorized(_) | ProviderError::InvalidRequest(_)
        )
    }

    /// Map a non-success HTTP status and its error message.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = format!("{} {}", status.as_u16(), message.into());
        match status.as_u16() {
            429 => ProviderError::RateLimited(message),
            401 | 403 => ProviderError::Unauthorized(message),
            408 => ProviderError::Timeout(message),
            500..=599 => ProviderError::TransientNetwork(message),
            400..=499 => ProviderError::InvalidRequest(message),
            _ => ProviderError::Unknown(message),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ProviderError::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return ProviderError::from_status(status, err.to_string());
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return ProviderError::TransientNetwork(err.to_string());
        }
        ProviderError::Unknown(err.to_string())
    }
}

/// Pull a human-readable message out of a provider error body. Both OpenAI-style and
/// Anthropic-style bodies carry `{"error": {"message": ...}}`.
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["message"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Why one provider was given up on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ProviderError },

    #[error("fatal after {attempts} attempts: {error}")]
    Fatal { attempts: u32, error: ProviderError },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Fatal { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn source_error(&self) -> &ProviderError {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub error: RetryError,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("all providers exhausted: {}", summarize(.failures))]
    AllProvidersExhausted { failures: Vec<ProviderFailure> },
}

fn summarize(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no provider has credentials configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.provider, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let cases = vec![
            (429, ErrorKind::RateLimit),
            (401, ErrorKind::AuthError),
            (403, ErrorKind::AuthError),
            (408, ErrorKind::Timeout),
            (500, ErrorKind::NetworkError),
            (502, ErrorKind::NetworkError),
            (503, ErrorKind::NetworkError),
            (529, ErrorKind::NetworkError),
            (400, ErrorKind::InvalidRequest),
            (404, ErrorKind::InvalidRequest),
            (422, ErrorKind::InvalidRequest),
            (302, ErrorKind::UnknownError),
        ];

        for (code, expected) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                ProviderError::from_status(status, "x").kind(),
                expected,
                "status {code} should classify as {expected:?}"
            );
        }
    }

    #[test]
    fn test_retryable_split() {
        assert!(ProviderError::RateLimited("x".into()).is_retryable());
        assert!(ProviderError::Timeout("x".into()).is_retryable());
        assert!(ProviderError::TransientNetwork("x".into()).is_retryable());
        assert!(ProviderError::Unknown("x".into()).is_retryable());
        assert!(!ProviderError::Unauthorized("x".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("x".into()).is_retryable());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::RateLimit.as_str(), "rate_limit");
        assert_eq!(ErrorKind::AuthError.as_str(), "auth_error");
        assert_eq!(ErrorKind::NetworkError.as_str(), "network_error");
    }

    #[test]
    fn test_extract_error_message() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(extract_error_message(body), "Incorrect API key provided");
        assert_eq!(extract_error_message("  upstream down \n"), "upstream down");
    }

    #[test]
    fn test_all_exhausted_display_lists_providers() {
        let err = GenerateError::AllProvidersExhausted {
            failures: vec![
                ProviderFailure {
                    provider: ProviderId::OpenAi,
                    error: RetryError::Fatal {
                        attempts: 1,
                        error: ProviderError::Unauthorized("401 bad key".into()),
                    },
                },
                ProviderFailure {
                    provider: ProviderId::Fireworks,
                    error: RetryError::Exhausted {
                        attempts: 3,
                        last: ProviderError::TransientNetwork("503 down".into()),
                    },
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("openai: fatal after 1 attempts"));
        assert!(msg.contains("fireworks: retries exhausted after 3 attempts"));
    }

    #[test]
    fn test_no_credentials_display() {
        let err = GenerateError::AllProvidersExhausted { failures: vec![] };
        assert!(err.to_string().contains("no provider has credentials"));
    }
}
