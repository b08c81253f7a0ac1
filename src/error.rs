use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("submission not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Errors raised inside the grading pipeline itself (store, OCR stage,
/// grading engine). These never reach an HTTP client directly; a submission
/// that fails here is observed only through its `processing_status`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("submission {0} not found")]
    SubmissionNotFound(String),

    #[error("status transition not applied: submission already at or past the requested rank")]
    StatusNotApplied,

    #[error("rubric invalid: {0}")]
    InvalidRubric(String),

    #[error("question {0} has no rubric")]
    MissingRubric(String),

    #[error("vision provider error: {0}")]
    Vision(#[from] VisionError),

    #[error("evaluator error: {0}")]
    Evaluator(#[from] LlmError),

    #[error("worker queue closed")]
    QueueClosed,
}

/// Shared shape for errors the retry helper in `llm::retry` knows how to
/// back off on, so OCR calls and evaluator calls can reuse one loop.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
    fn retry_after_ms(&self) -> Option<u64>;
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("rate limit exceeded: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider unavailable: {provider}")]
    Unavailable { provider: String },
}

impl VisionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::Unavailable { .. }
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

impl RetryableError for VisionError {
    fn is_retryable(&self) -> bool {
        VisionError::is_retryable(self)
    }

    fn retry_after_ms(&self) -> Option<u64> {
        VisionError::retry_after_ms(self)
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("rate limit exceeded: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("provider unavailable: {provider}")]
    Unavailable { provider: String },
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::Unavailable { .. }
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

impl RetryableError for LlmError {
    fn is_retryable(&self) -> bool {
        LlmError::is_retryable(self)
    }

    fn retry_after_ms(&self) -> Option<u64> {
        LlmError::retry_after_ms(self)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config: {0}")]
    MissingRequired(String),

    #[error("invalid value for {0}")]
    InvalidValue(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Pipeline(_) => "PIPELINE_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_retryable() {
        let rate_limited = LlmError::RateLimited {
            retry_after_ms: 1000,
        };
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_after_ms(), Some(1000));

        let auth_failed = LlmError::AuthenticationFailed("bad token".to_string());
        assert!(!auth_failed.is_retryable());
        assert_eq!(auth_failed.retry_after_ms(), None);
    }

    #[test]
    fn test_vision_error_retryable() {
        let rate_limited = VisionError::RateLimited {
            retry_after_ms: 15_000,
        };
        assert!(rate_limited.is_retryable());

        let unavailable = VisionError::Unavailable {
            provider: "gemini".into(),
        };
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_api_error_status_codes() {
        use actix_web::ResponseError;

        let not_found = ApiError::NotFound("submission_123".to_string());
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let bad_request = ApiError::BadRequest("missing field".to_string());
        assert_eq!(bad_request.status_code(), StatusCode::BAD_REQUEST);
    }
}
