//! Terraform `http` backend endpoint.
//!
//! Terraform uses the custom verbs `LOCK` and `UNLOCK` alongside GET/POST/DELETE
//! on one address, so the route is registered with `any()` and dispatched here.
//! Lock conflicts answer with the stored lock payload verbatim so Terraform can
//! print who holds it.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use nahcloud_domain::{DomainError, TfStateLock};
use nahcloud_service::{LockAttempt, StoredLock, UnlockOutcome};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::extract::ApiQuery;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LockQuery {
    #[serde(rename = "ID")]
    pub id: Option<String>,
}

pub async fn handle(
    State(state): State<AppState>,
    Path(state_id): Path<String>,
    method: Method,
    ApiQuery(query): ApiQuery<LockQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let lock_id = query.id.unwrap_or_default();
    match method.as_str() {
        "GET" => get_state(&state, &state_id).await,
        "POST" => post_state(&state, &state_id, &lock_id, body).await,
        "DELETE" => delete_state(&state, &state_id, &lock_id).await,
        "LOCK" => lock(&state, &state_id, body).await,
        "UNLOCK" => unlock(&state, &state_id, lock_id, body).await,
        other => Err(ApiError::method_not_allowed(other)),
    }
}

async fn get_state(state: &AppState, state_id: &str) -> Result<Response, ApiError> {
    let value = state.service.get_state(state_id).await?;
    Ok(json_body(StatusCode::OK, value))
}

async fn post_state(
    state: &AppState,
    state_id: &str,
    lock_id: &str,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(held) = conflicting_lock(state, state_id, lock_id).await? {
        return Ok(json_body(StatusCode::LOCKED, held));
    }
    let value = utf8(body)?;
    state.service.set_state(state_id, value).await?;
    Ok(StatusCode::OK.into_response())
}

async fn delete_state(
    state: &AppState,
    state_id: &str,
    lock_id: &str,
) -> Result<Response, ApiError> {
    if let Some(held) = conflicting_lock(state, state_id, lock_id).await? {
        return Ok(json_body(StatusCode::LOCKED, held));
    }
    state.service.delete_state(state_id).await?;
    Ok(StatusCode::OK.into_response())
}

async fn lock(state: &AppState, state_id: &str, body: Bytes) -> Result<Response, ApiError> {
    let payload = utf8(body)?;
    match TfStateLock::parse(&payload) {
        Ok(lock) if !lock.id.is_empty() => {}
        _ => {
            return Err(
                DomainError::invalid_input("invalid lock payload: missing or invalid ID").into()
            )
        }
    }

    match state.service.try_lock(state_id, payload).await? {
        LockAttempt::Acquired => Ok(StatusCode::OK.into_response()),
        LockAttempt::AlreadyLocked { existing } => Ok(json_body(StatusCode::LOCKED, existing)),
    }
}

/// The lock ID comes from `?ID=`; when absent, the `ID` of a lock body is used.
async fn unlock(
    state: &AppState,
    state_id: &str,
    query_id: String,
    body: Bytes,
) -> Result<Response, ApiError> {
    let lock_id = if query_id.is_empty() {
        std::str::from_utf8(&body)
            .ok()
            .and_then(|b| TfStateLock::parse(b).ok())
            .map(|l| l.id)
            .unwrap_or_default()
    } else {
        query_id
    };

    match state.service.release_lock(state_id, &lock_id).await? {
        UnlockOutcome::NotLocked => {
            debug!(%state_id, "unlock without a lock");
            Ok(StatusCode::OK.into_response())
        }
        UnlockOutcome::HeldByOther(held) => Ok(json_body(StatusCode::CONFLICT, held.into_raw())),
        UnlockOutcome::Released(StoredLock::Unparsed { .. }) => {
            info!(%state_id, "cleared unparseable lock");
            Ok(StatusCode::OK.into_response())
        }
        UnlockOutcome::Released(_) => Ok(StatusCode::OK.into_response()),
    }
}

/// Payload of a lock that `lock_id` does not hold, if any.
async fn conflicting_lock(
    state: &AppState,
    state_id: &str,
    lock_id: &str,
) -> Result<Option<String>, ApiError> {
    match state.service.get_lock(state_id).await {
        Ok(current) if current.is_held_by(lock_id) => Ok(None),
        Ok(current) => Ok(Some(current.into_raw())),
        Err(DomainError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn utf8(body: Bytes) -> Result<String, ApiError> {
    String::from_utf8(body.to_vec()).map_err(|_| ApiError::bad_request("body is not valid UTF-8"))
}

fn json_body(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
