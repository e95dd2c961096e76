use actix_web::{error::JsonPayloadError, http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

const ERROR_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoProvidersAvailable,
    ServiceTemporarilyUnavailable,
    UpstreamUnavailable,
    ClientConstruction,
    QuotaExhausted,
    RepositoryUnavailable,
    InvalidRequest,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoProvidersAvailable => "NO_PROVIDERS_AVAILABLE",
            ErrorCode::ServiceTemporarilyUnavailable => "SERVICE_TEMPORARILY_UNAVAILABLE",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::ClientConstruction => "CLIENT_CONSTRUCTION_FAILED",
            ErrorCode::QuotaExhausted => "QUOTA_EXHAUSTED",
            ErrorCode::RepositoryUnavailable => "REPOSITORY_UNAVAILABLE",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::NoProvidersAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ServiceTemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::ClientConstruction => StatusCode::BAD_GATEWAY,
            ErrorCode::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::RepositoryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn retry_hint_ms(&self) -> u64 {
        match self {
            ErrorCode::InvalidRequest | ErrorCode::ClientConstruction => 0,
            ErrorCode::QuotaExhausted => 60_000,
            ErrorCode::NoProvidersAvailable
            | ErrorCode::ServiceTemporarilyUnavailable
            | ErrorCode::UpstreamUnavailable
            | ErrorCode::RepositoryUnavailable
            | ErrorCode::InternalError => 30_000,
        }
    }
}

/// Failure reported by a caller-supplied operation or a probe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|code| code.as_u16());
        let message = if err.is_timeout() {
            format!("request timeout: {err}")
        } else {
            err.to_string()
        };
        Self { status, message }
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no providers available: {0}")]
    NoProvidersAvailable(String),
    #[error("client for provider {provider} could not be built: {reason}")]
    ClientConstruction { provider: String, reason: String },
    #[error("provider {provider} failed transiently: {source}")]
    RetryableProvider {
        provider: String,
        #[source]
        source: ProviderError,
    },
    #[error("provider {provider} failed: {source}")]
    TerminalProvider {
        provider: String,
        #[source]
        source: ProviderError,
    },
    #[error("all providers exhausted (attempted: {}): {last}", .attempted.join(", "))]
    AllProvidersExhausted {
        attempted: Vec<String>,
        #[source]
        last: Box<RouterError>,
    },
    #[error("local quota exhausted for provider {0}")]
    QuotaExhausted(String),
    #[error("repository unavailable: {0}")]
    Repository(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl RouterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::NoProvidersAvailable(_) => ErrorCode::NoProvidersAvailable,
            RouterError::AllProvidersExhausted { .. } => ErrorCode::ServiceTemporarilyUnavailable,
            RouterError::RetryableProvider { .. } | RouterError::TerminalProvider { .. } => {
                ErrorCode::UpstreamUnavailable
            }
            RouterError::ClientConstruction { .. } => ErrorCode::ClientConstruction,
            RouterError::QuotaExhausted(_) => ErrorCode::QuotaExhausted,
            RouterError::Repository(_) => ErrorCode::RepositoryUnavailable,
            RouterError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RouterError::Any(_) => ErrorCode::InternalError,
        }
    }

    pub fn retry_hint_ms(&self) -> u64 {
        self.code().retry_hint_ms()
    }

    /// Provider names tried before giving up, for exhausted failures.
    pub fn attempted(&self) -> Option<&[String]> {
        match self {
            RouterError::AllProvidersExhausted { attempted, .. } => Some(attempted),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&RouterError> {
        match self {
            RouterError::AllProvidersExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RouterError::RetryableProvider { .. })
    }

    /// Message shown to callers outside the engine. Exhaustion collapses
    /// into a single unavailability notice; the rest keep their display.
    pub fn public_message(&self) -> String {
        match self {
            RouterError::AllProvidersExhausted { .. } => "service temporarily unavailable".into(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    inner: RouterError,
}

impl ApiError {
    pub fn new(inner: RouterError) -> Self {
        Self { inner }
    }
}

impl From<RouterError> for ApiError {
    fn from(value: RouterError) -> Self {
        ApiError::new(value)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.inner.code().status()
    }

    fn error_response(&self) -> HttpResponse {
        #[derive(Debug, Serialize)]
        struct ErrorDetail {
            attempted: Vec<String>,
            last_error: String,
        }

        #[derive(Debug, Serialize)]
        struct ErrorBody {
            schema_version: &'static str,
            code: &'static str,
            message: String,
            retry_hint_ms: u64,
            #[serde(skip_serializing_if = "Option::is_none")]
            detail: Option<ErrorDetail>,
        }

        let detail = match &self.inner {
            RouterError::AllProvidersExhausted { attempted, last } => Some(ErrorDetail {
                attempted: attempted.clone(),
                last_error: last.to_string(),
            }),
            _ => None,
        };
        let body = ErrorBody {
            schema_version: ERROR_SCHEMA_VERSION,
            code: self.inner.code().as_str(),
            message: self.inner.public_message(),
            retry_hint_ms: self.inner.retry_hint_ms(),
            detail,
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

pub fn json_error(err: JsonPayloadError) -> actix_web::Error {
    ApiError::new(RouterError::InvalidRequest(err.to_string())).into()
}
