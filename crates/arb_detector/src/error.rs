//! Error taxonomy shared by the scheduler, the adapters and the binaries.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    /// Missing or invalid credential, bad filter/input.
    UserError,
    /// Upstream HTTP 4xx/429/5xx or malformed upstream payload.
    ProviderError,
    /// Invariant violation, unexpected internal failure, parse failure.
    SystemError,
    /// Local storage unavailable, network unreachable below HTTP.
    InfrastructureError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError           => "UserError",
            ErrorCategory::ProviderError       => "ProviderError",
            ErrorCategory::SystemError         => "SystemError",
            ErrorCategory::InfrastructureError => "InfrastructureError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A surfaced failure: category, stable code, message, correlation id, details.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{category} {code}: {message} (correlation {correlation_id})")]
pub struct CoreError {
    pub category:       ErrorCategory,
    pub code:           String,
    pub message:        String,
    pub correlation_id: String,
    /// Upstream HTTP status when one was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status:    Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details:        Option<Value>,
}

impl CoreError {
    pub fn new(
        category:       ErrorCategory,
        code:           impl Into<String>,
        message:        impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            correlation_id: correlation_id.into(),
            http_status: None,
            details: None,
        }
    }

    pub fn user(code: impl Into<String>, message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::new(ErrorCategory::UserError, code, message, correlation_id)
    }

    pub fn provider(code: impl Into<String>, message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ProviderError, code, message, correlation_id)
    }

    pub fn system(code: impl Into<String>, message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::new(ErrorCategory::SystemError, code, message, correlation_id)
    }

    pub fn infrastructure(code: impl Into<String>, message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InfrastructureError, code, message, correlation_id)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

/// Upstream client failure, decided at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamFailure {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl UpstreamFailure {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            UpstreamFailure::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify into the four-category taxonomy.
    pub fn into_core_error(self, provider: &str, correlation_id: &str) -> CoreError {
        match self {
            UpstreamFailure::Http { status, body } if status >= 400 => {
                let code = match status {
                    429       => "PROVIDER_RATE_LIMITED",
                    400..=499 => "PROVIDER_HTTP_4XX",
                    _         => "PROVIDER_HTTP_5XX",
                };
                CoreError::provider(code, format!("{provider} answered HTTP {status}"), correlation_id)
                    .with_http_status(status)
                    .with_details(serde_json::json!({ "provider": provider, "body": body }))
            }
            UpstreamFailure::Http { status, body } => {
                CoreError::system("UNEXPECTED_HTTP_STATUS", format!("{provider} answered HTTP {status}"), correlation_id)
                    .with_http_status(status)
                    .with_details(serde_json::json!({ "provider": provider, "body": body }))
            }
            UpstreamFailure::Network(cause) => {
                CoreError::infrastructure("NETWORK_UNREACHABLE", cause, correlation_id)
                    .with_details(serde_json::json!({ "provider": provider }))
            }
            UpstreamFailure::Timeout => {
                CoreError::infrastructure("UPSTREAM_TIMEOUT", format!("{provider} request timed out"), correlation_id)
                    .with_details(serde_json::json!({ "provider": provider }))
            }
            UpstreamFailure::Unknown(cause) => {
                CoreError::system("UNEXPECTED", cause, correlation_id)
                    .with_details(serde_json::json!({ "provider": provider }))
            }
        }
    }
}
