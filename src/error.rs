use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::RateLimitPolicy;

const RATE_LIMIT_RETRY_AFTER_SECONDS: u64 = 30;

/// Failure of a resolve, classified so it can be retried or mapped to a status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream blocked the request: {0}")]
    Blocked(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl FetchError {
    /// Rate limiting and timeouts are worth another attempt against the same provider.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_))
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::InvalidInput(detail)
            | Self::Blocked(detail)
            | Self::NotFound(detail)
            | Self::RateLimited(detail)
            | Self::Timeout(detail)
            | Self::Upstream(detail) => detail,
        }
    }

    pub fn classify(status: Option<u16>, message: &str, policy: &RateLimitPolicy) -> Self {
        let detail = message.to_string();
        if policy.matches(status, message) {
            return Self::RateLimited(detail);
        }

        match status {
            Some(403) => return Self::Blocked(detail),
            Some(404) => return Self::NotFound(detail),
            Some(408 | 504) => return Self::Timeout(detail),
            _ => {}
        }

        let lower = message.to_ascii_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout(detail)
        } else if lower.contains("private")
            || lower.contains("deleted")
            || lower.contains("not found")
        {
            Self::NotFound(detail)
        } else if lower.contains("forbidden") || lower.contains("blocked") {
            Self::Blocked(detail)
        } else {
            Self::Upstream(detail)
        }
    }

    /// Transport failures are classified from the error kind only. The reqwest
    /// message embeds the request URL, which carries the user's link.
    pub fn from_reqwest(error: &reqwest::Error, policy: &RateLimitPolicy) -> Self {
        if error.is_timeout() {
            return Self::Timeout("Upstream request timed out".to_string());
        }

        if let Some(status) = error.status() {
            let code = status.as_u16();
            return Self::classify(Some(code), &format!("HTTP {code}"), policy);
        }

        let kind = if error.is_connect() {
            "connection failed"
        } else if error.is_redirect() {
            "too many redirects"
        } else if error.is_decode() || error.is_body() {
            "unreadable response body"
        } else {
            "request failed"
        };
        Self::Upstream(format!("Upstream {kind}"))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Error returned by the HTTP handlers, rendered as the JSON error envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
            retry_after_seconds: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
            retry_after_seconds: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: None,
            retry_after_seconds: None,
        }
    }

    pub fn not_deliverable() -> Self {
        Self::not_found(
            "This video appears to be private, deleted, or not available for download.",
        )
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        let (status, message) = match &error {
            FetchError::InvalidInput(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            FetchError::Blocked(_) => (
                StatusCode::FORBIDDEN,
                "TikTok is currently blocking requests. Please try again later.".to_string(),
            ),
            FetchError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "Video not found. It may be private, deleted, or the URL is incorrect."
                    .to_string(),
            ),
            FetchError::RateLimited(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests to the download services. Please wait a moment and retry."
                    .to_string(),
            ),
            FetchError::Timeout(_) => (
                StatusCode::REQUEST_TIMEOUT,
                "Request timed out. The service may be temporarily unavailable.".to_string(),
            ),
            FetchError::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to process TikTok video.".to_string(),
            ),
        };

        let details = match error {
            FetchError::InvalidInput(_) => None,
            other => Some(other.detail().to_string()),
        };
        let retry_after_seconds = (status == StatusCode::TOO_MANY_REQUESTS)
            .then_some(RATE_LIMIT_RETRY_AFTER_SECONDS);

        Self {
            status,
            message,
            details,
            retry_after_seconds,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            status: "error",
            message: self.message,
            details: self.details,
            timestamp: Utc::now(),
        });

        let mut response = (self.status, body).into_response();
        if let Some(seconds) = self.retry_after_seconds
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        response
    }
}
