//! Input validation shared by the service layer.

use serde_json::json;

use crate::error::DomainError;
use crate::types::InstanceStatus;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_CPU: i64 = 64;
pub const MAX_MEMORY_MB: i64 = 512 * 1024;
pub const MAX_OBJECT_PATH_LEN: usize = 1024;

/// Names of projects, instances and buckets: 1..=255 chars of `[A-Za-z0-9_-]`.
pub fn resource_name(kind: &str, name: &str) -> Result<(), DomainError> {
    if name.is_empty() {
        return Err(DomainError::invalid_input(format!("{kind} name cannot be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DomainError::invalid_input_with(
            format!("{kind} name too long"),
            json!({ "max_length": MAX_NAME_LEN, "actual": name.len() }),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(DomainError::invalid_input(format!(
            "{kind} name can only contain alphanumeric characters, dashes, and underscores"
        )));
    }
    Ok(())
}

/// Returns the checked `(cpu, memory_mb)` pair.
pub fn instance_specs(cpu: i64, memory_mb: i64, image: &str) -> Result<(u32, u32), DomainError> {
    if cpu <= 0 {
        return Err(DomainError::invalid_input_with("CPU must be positive", json!({ "cpu": cpu })));
    }
    if cpu > MAX_CPU {
        return Err(DomainError::invalid_input_with(
            "CPU too high",
            json!({ "max_cpu": MAX_CPU, "actual": cpu }),
        ));
    }
    if memory_mb <= 0 {
        return Err(DomainError::invalid_input_with(
            "memory must be positive",
            json!({ "memory_mb": memory_mb }),
        ));
    }
    if memory_mb > MAX_MEMORY_MB {
        return Err(DomainError::invalid_input_with(
            "memory too high",
            json!({ "max_memory_mb": MAX_MEMORY_MB, "actual": memory_mb }),
        ));
    }
    if image.is_empty() {
        return Err(DomainError::invalid_input("image cannot be empty"));
    }
    if image.len() > MAX_NAME_LEN {
        return Err(DomainError::invalid_input_with(
            "image name too long",
            json!({ "max_length": MAX_NAME_LEN, "actual": image.len() }),
        ));
    }
    // Bounds above make these conversions infallible.
    Ok((cpu as u32, memory_mb as u32))
}

pub fn instance_status(status: &str) -> Result<InstanceStatus, DomainError> {
    status.parse()
}

pub fn object_path(path: &str) -> Result<(), DomainError> {
    if path.is_empty() {
        return Err(DomainError::invalid_input("object path cannot be empty"));
    }
    if path.len() > MAX_OBJECT_PATH_LEN {
        return Err(DomainError::invalid_input_with(
            "object path too long",
            json!({ "max_length": MAX_OBJECT_PATH_LEN, "actual": path.len() }),
        ));
    }
    Ok(())
}
