use nahcloud_domain::DomainError;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{resource} not found: {identifier}")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },

    #[error("{resource} with {field} '{value}' already exists")]
    AlreadyExists {
        resource: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("referenced {resource} with {field} '{value}' does not exist")]
    ForeignKeyViolation {
        resource: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("{message}")]
    InvalidInput {
        message: String,
        details: Option<Value>,
    },

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(resource: &'static str, identifier: impl Into<String>) -> Self {
        StoreError::NotFound { resource, identifier: identifier.into() }
    }

    pub fn already_exists(
        resource: &'static str,
        field: &'static str,
        value: impl Into<String>,
    ) -> Self {
        StoreError::AlreadyExists { resource, field, value: value.into() }
    }

    pub fn foreign_key(
        resource: &'static str,
        field: &'static str,
        value: impl Into<String>,
    ) -> Self {
        StoreError::ForeignKeyViolation { resource, field, value: value.into() }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { resource, identifier } => {
                DomainError::not_found(resource, identifier)
            }
            StoreError::AlreadyExists { resource, field, value } => {
                DomainError::already_exists(resource, field, value)
            }
            StoreError::ForeignKeyViolation { resource, field, value } => {
                DomainError::foreign_key(resource, field, value)
            }
            StoreError::InvalidInput { message, details } => {
                DomainError::InvalidInput { message, details }
            }
            StoreError::Internal(msg) => DomainError::Internal(msg),
        }
    }
}
