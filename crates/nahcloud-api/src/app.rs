use axum::extract::Request;
use axum::http::{header, HeaderName, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use nahcloud_chaos::{ResourceCategory, LATENCY_HEADER, NO_CHAOS_HEADER};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;
use crate::{auth, chaos, handlers, tfstate};

pub fn build_app(state: AppState) -> Router {
    let projects = Router::new()
        .route("/projects", post(handlers::create_project).get(handlers::list_projects))
        .route(
            "/projects/:id",
            get(handlers::get_project)
                .patch(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), ResourceCategory::Projects),
            chaos::inject,
        ));

    let instances = Router::new()
        .route("/instances", post(handlers::create_instance).get(handlers::list_instances))
        .route(
            "/instances/:id",
            get(handlers::get_instance)
                .patch(handlers::update_instance)
                .delete(handlers::delete_instance),
        )
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), ResourceCategory::Instances),
            chaos::inject,
        ));

    let metadata = Router::new()
        .route("/metadata", post(handlers::create_metadata).get(handlers::list_metadata))
        .route(
            "/metadata/:id",
            get(handlers::get_metadata)
                .patch(handlers::update_metadata)
                .delete(handlers::delete_metadata),
        )
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), ResourceCategory::Metadata),
            chaos::inject,
        ));

    let v1 = Router::new()
        .merge(projects)
        .merge(instances)
        .merge(metadata)
        // Storage
        .route("/buckets", post(handlers::create_bucket).get(handlers::list_buckets))
        .route(
            "/buckets/:id",
            get(handlers::get_bucket)
                .patch(handlers::update_bucket)
                .delete(handlers::delete_bucket),
        )
        .route(
            "/bucket/:bucket_id/objects",
            post(handlers::create_object).get(handlers::list_objects),
        )
        .route(
            "/bucket/:bucket_id/objects/:id",
            get(handlers::get_object)
                .patch(handlers::update_object)
                .delete(handlers::delete_object),
        )
        // Terraform state
        .route("/tfstate/:id", any(tfstate::handle))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer_token));

    let timeout = state.request_timeout;

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/buildz", get(handlers::buildz))
        .nest("/v1", v1)
        .fallback(handlers::route_not_found)
        .layer(middleware::from_fn(answer_options))
        .layer(TimeoutLayer::new(timeout))
        .layer(middleware::from_fn(json_error_bodies))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static(NO_CHAOS_HEADER),
            HeaderName::from_static(LATENCY_HEADER),
        ])
}

/// Any OPTIONS request that is not a CORS preflight still gets a bare 200.
async fn answer_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

/// Router rejections and the timeout layer answer with an empty body.
/// Give every bodyless error the same JSON shape as handler errors.
async fn json_error_bodies(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let response = next.run(request).await;

    let status = response.status();
    let is_error = status.is_client_error() || status.is_server_error();
    if !is_error || response.headers().contains_key(header::CONTENT_TYPE) {
        return response;
    }

    let error = match status {
        StatusCode::NOT_FOUND => ApiError::route_not_found(uri.path()),
        StatusCode::METHOD_NOT_ALLOWED => ApiError::method_not_allowed(method.as_str()),
        StatusCode::REQUEST_TIMEOUT => ApiError::request_timeout(),
        other => ApiError::from_status(other),
    };
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let mut mapped = error.into_response();
    mapped.headers_mut().extend(parts.headers);
    mapped
}
