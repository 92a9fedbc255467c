use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::hal::{self, Link, Links};

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A connection pool configuration error.
    #[error("Pool creation error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] sonic_rs::Error),

    /// The identity provider could not be reached.
    #[error("Identity provider error: {0}")]
    IdentityProvider(#[from] reqwest::Error),

    /// The identity proof failed verification. Terminal.
    #[error("Invalid access token")]
    InvalidAccessToken,

    /// Signature mismatch, unknown or expired session. Terminal; the client
    /// must authorize again.
    #[error("Invalid session")]
    InvalidSession,

    /// The caller is authenticated but may not touch this resource.
    #[error("Forbidden")]
    Forbidden,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// The request shape is invalid.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        violations: Vec<Violation>,
    },

    /// An explicit HTTP failure.
    #[error("{title}: {message}")]
    Http {
        status: StatusCode,
        title: String,
        message: String,
    },

    /// A store or verifier call exceeded its deadline. Retryable.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Too many requests from one client address.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// A stored row is missing a column.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// A validation failure on a single field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        AppError::Validation {
            violations: vec![Violation {
                field: field.into(),
                message: message.clone(),
            }],
            message,
        }
    }

    pub fn http(status: StatusCode, title: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Http {
            status,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidAccessToken | AppError::InvalidSession => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Http { status, .. } => *status,
            AppError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::IdentityProvider(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::CreatePool(_)
            | AppError::Redis(_)
            | AppError::Serialization(_)
            | AppError::MissingData(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Timeout(_) | AppError::IdentityProvider(_))
    }
}

/// HAL error envelope.
#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "_links")]
    links: Links,
    status: u16,
    title: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<Violation>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (message, details, violations) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                ("Internal server error".to_string(), None, Vec::new())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                ("Internal server error".to_string(), None, Vec::new())
            }

            AppError::CreatePool(ref e) => {
                tracing::error!("Pool creation error: {}", e);
                ("Internal server error".to_string(), None, Vec::new())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                ("Internal server error".to_string(), None, Vec::new())
            }

            AppError::Serialization(ref e) => {
                tracing::error!("Serialization error: {}", e);
                ("Internal server error".to_string(), None, Vec::new())
            }

            AppError::MissingData(ref column) => {
                tracing::error!("Missing column in stored row: {}", column);
                ("Internal server error".to_string(), None, Vec::new())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), None, Vec::new())
            }

            AppError::IdentityProvider(ref e) => {
                tracing::error!("Identity provider error: {}", e);
                ("Identity provider unavailable".to_string(), None, Vec::new())
            }

            AppError::InvalidAccessToken => {
                ("The access token could not be verified".to_string(), None, Vec::new())
            }

            // Unknown, expired and mismatched sessions share one body.
            AppError::InvalidSession => {
                ("The session is not valid, authorize again".to_string(), None, Vec::new())
            }

            AppError::Forbidden => {
                tracing::warn!("Authorization failed");
                ("Forbidden".to_string(), None, Vec::new())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                ("Resource not found".to_string(), None, Vec::new())
            }

            AppError::Validation { message, violations } => {
                tracing::debug!("Validation error: {}", message);
                ("The request is invalid".to_string(), Some(message), violations)
            }

            AppError::Http { message, .. } => (message, None, Vec::new()),

            AppError::Timeout(ref operation) => {
                tracing::warn!("Operation timed out: {}", operation);
                ("The service is busy, retry shortly".to_string(), None, Vec::new())
            }

            AppError::RateLimitExceeded(msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                ("Too many requests, slow down".to_string(), Some(msg), Vec::new())
            }
        };

        let mut links = Links::new();
        links.insert("index".to_string(), Link::new("/"));

        let body = ErrorBody {
            links,
            status: status.as_u16(),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details,
            violations,
        };

        let mut response = hal::render(status, &body);
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_session_failures_are_indistinguishable() {
        let (status, body) = body_json(AppError::InvalidSession).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["_links"]["index"]["href"], "/");
        assert_eq!(body["status"], 401);
        assert_eq!(body["title"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_validation_carries_violations() {
        let (status, body) = body_json(AppError::validation("label", "label is required")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["violations"][0]["field"], "label");
        assert_eq!(body["details"], "label is required");
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_leaked() {
        let (status, body) = body_json(AppError::Internal("connection string secret".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(!body.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let error = AppError::Timeout("get_session".into());
        assert!(error.is_retryable());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
