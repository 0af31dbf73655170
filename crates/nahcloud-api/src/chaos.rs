use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use nahcloud_chaos::{ChaosOverrides, ResourceCategory};

use crate::error::ApiError;
use crate::state::AppState;

/// Route middleware that runs the chaos engine for one resource category
/// before the handler. Injected errors short-circuit with the usual error body.
pub async fn inject(
    State((state, category)): State<(AppState, ResourceCategory)>,
    request: Request,
    next: Next,
) -> Response {
    let overrides = ChaosOverrides::from_headers(request.headers());
    let method = request.method().clone();

    match state.chaos.apply(category, &overrides, &method, &state.shutdown).await {
        Ok(()) => next.run(request).await,
        Err(e) => ApiError::from(e).into_response(),
    }
}
