use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nahcloud_domain::DomainError;
use serde_json::{json, Value};
use tracing::{debug, error};

/// JSON error response: `{"error": CODE, "message": ..., "details": {...}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_INPUT",
            message: msg.into(),
            details: None,
        }
    }

    pub fn method_not_allowed(method: &str) -> Self {
        ApiError {
            status: StatusCode::METHOD_NOT_ALLOWED,
            code: "METHOD_NOT_ALLOWED",
            message: format!("method {method} not allowed"),
            details: None,
        }
    }

    pub fn route_not_found(path: &str) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: format!("no route for {path}"),
            details: None,
        }
    }

    pub fn request_timeout() -> Self {
        ApiError {
            status: StatusCode::REQUEST_TIMEOUT,
            code: "REQUEST_TIMEOUT",
            message: "request timed out".into(),
            details: None,
        }
    }

    /// Generic body for an error status nothing else described.
    pub fn from_status(status: StatusCode) -> Self {
        let code = if status.is_server_error() { "INTERNAL_ERROR" } else { "INVALID_INPUT" };
        ApiError {
            status,
            code,
            message: status.canonical_reason().unwrap_or("request failed").to_lowercase(),
            details: None,
        }
    }
}

pub fn status_for(e: &DomainError) -> StatusCode {
    match e {
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::AlreadyExists { .. } => StatusCode::CONFLICT,
        DomainError::InvalidInput { .. } | DomainError::ForeignKeyViolation { .. } => {
            StatusCode::BAD_REQUEST
        }
        DomainError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        DomainError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
        DomainError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        ApiError {
            status: status_for(&e),
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::bad_request(format!("invalid JSON body: {}", e.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::bad_request(format!("invalid query string: {}", e.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        } else {
            debug!(code = self.code, message = %self.message, "request rejected");
        }
        let mut body = json!({ "error": self.code, "message": self.message });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}
