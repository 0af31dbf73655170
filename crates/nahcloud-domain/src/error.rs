use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("{resource} not found")]
    NotFound { resource: String, identifier: String },

    #[error("{resource} with {field} '{value}' already exists")]
    AlreadyExists {
        resource: String,
        field: String,
        value: String,
    },

    #[error("{message}")]
    InvalidInput {
        message: String,
        details: Option<Value>,
    },

    #[error("referenced {resource} with {field} '{value}' does not exist")]
    ForeignKeyViolation {
        resource: String,
        field: String,
        value: String,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(resource: impl Into<String>, identifier: impl Into<String>) -> Self {
        DomainError::NotFound { resource: resource.into(), identifier: identifier.into() }
    }

    pub fn already_exists(
        resource: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        DomainError::AlreadyExists {
            resource: resource.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        DomainError::InvalidInput { message: message.into(), details: None }
    }

    pub fn invalid_input_with(message: impl Into<String>, details: Value) -> Self {
        DomainError::InvalidInput { message: message.into(), details: Some(details) }
    }

    pub fn foreign_key(
        resource: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        DomainError::ForeignKeyViolation {
            resource: resource.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DomainError::Internal(message.into())
    }

    /// Stable machine-readable code, serialized as the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "NOT_FOUND",
            DomainError::AlreadyExists { .. } => "ALREADY_EXISTS",
            DomainError::InvalidInput { .. } => "INVALID_INPUT",
            DomainError::ForeignKeyViolation { .. } => "FOREIGN_KEY_VIOLATION",
            DomainError::Unauthorized(_) => "UNAUTHORIZED",
            DomainError::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            DomainError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            DomainError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            DomainError::NotFound { resource, identifier } => Some(json!({
                "resource": resource,
                "identifier": identifier,
            })),
            DomainError::AlreadyExists { resource, field, value }
            | DomainError::ForeignKeyViolation { resource, field, value } => Some(json!({
                "resource": resource,
                "field": field,
                "value": value,
            })),
            DomainError::InvalidInput { details, .. } => details.clone(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, DomainError::AlreadyExists { .. })
    }
}
