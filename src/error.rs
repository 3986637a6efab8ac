use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum PoolError {
    // Store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // Outbound HTTP errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    // Proxy errors
    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Could not resolve the local public IP after {attempts} attempts")]
    LocalIpUnavailable { attempts: u32 },

    // Extraction errors
    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Malformed node: {0}")]
    Extraction(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PoolError::InvalidRequest(_)
            | PoolError::InvalidProxyAddress(_)
            | PoolError::Json(_) => StatusCode::BAD_REQUEST,

            // 502 Bad Gateway
            PoolError::Http(_) | PoolError::Extraction(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            PoolError::StoreUnavailable(_) | PoolError::LocalIpUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            PoolError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            PoolError::Database(_)
            | PoolError::InvalidSelector { .. }
            | PoolError::InvalidConfig(_)
            | PoolError::Io(_)
            | PoolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a retry against the store has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PoolError::Database(_)
                | PoolError::StoreUnavailable(_)
                | PoolError::Io(_)
                | PoolError::Timeout { .. }
        )
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "status": "failure",
            "err": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            PoolError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PoolError::StoreUnavailable("reset".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PoolError::Timeout { secs: 10 }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            PoolError::LocalIpUnavailable { attempts: 3 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(PoolError::StoreUnavailable("gone".into()).is_transient());
        assert!(PoolError::Timeout { secs: 1 }.is_transient());
        assert!(!PoolError::InvalidConfig("nope".into()).is_transient());
        assert!(!PoolError::InvalidProxyAddress("x".into()).is_transient());
    }

    #[test]
    fn test_local_ip_message() {
        let err = PoolError::LocalIpUnavailable { attempts: 3 };
        assert_eq!(
            err.to_string(),
            "Could not resolve the local public IP after 3 attempts"
        );
    }
}
