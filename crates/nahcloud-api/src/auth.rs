use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use nahcloud_domain::DomainError;

use crate::error::ApiError;
use crate::state::AppState;

/// Axum middleware that requires a valid `Authorization: Bearer <token>` header.
///
/// Returns 401 for missing, malformed, or incorrect tokens. Passes everything
/// through when the server has no token configured.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected.as_str());

    if authorized {
        next.run(request).await
    } else {
        ApiError::from(DomainError::Unauthorized("missing or invalid bearer token".into()))
            .into_response()
    }
}
