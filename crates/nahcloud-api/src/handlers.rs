use axum::extract::{OriginalUri, Path, State};
use axum::http::StatusCode;
use axum::Json;
use nahcloud_domain::{
    Bucket, BucketFilter, CreateBucketRequest, CreateInstanceRequest, CreateMetadataRequest,
    CreateObjectRequest, CreateProjectRequest, Instance, InstanceFilter, Metadata,
    MetadataFilter, Object, ObjectFilter, Project, ProjectFilter, UpdateBucketRequest,
    UpdateInstanceRequest, UpdateMetadataRequest, UpdateObjectRequest, UpdateProjectRequest,
};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn route_not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::route_not_found(uri.path())
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.service.ping().await?;
    Ok(StatusCode::OK)
}

/// Build and runtime information.
pub async fn buildz(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.started_at.elapsed();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "uptime": format!("{}s", uptime.as_secs()),
        "uptime_seconds": uptime.as_secs(),
        "chaos": {
            "enabled": state.chaos.is_enabled(),
            "seed": state.chaos.seed(),
        },
    }))
}

// ── Projects ──────────────────────────────────────────────────────────────────

pub async fn create_project(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let project = state.service.create_project(req).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list_projects(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<ProjectFilter>,
) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(state.service.list_projects(&filter).await?))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.service.get_project(&id).await?))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.service.update_project(&id, req).await?))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_project(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Instances ─────────────────────────────────────────────────────────────────

pub async fn create_instance(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    let instance = state.service.create_instance(req).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

pub async fn list_instances(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<InstanceFilter>,
) -> Result<Json<Vec<Instance>>, ApiError> {
    Ok(Json(state.service.list_instances(&filter).await?))
}

pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    Ok(Json(state.service.get_instance(&id).await?))
}

pub async fn update_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateInstanceRequest>,
) -> Result<Json<Instance>, ApiError> {
    Ok(Json(state.service.update_instance(&id, req).await?))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_instance(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Metadata ──────────────────────────────────────────────────────────────────

pub async fn create_metadata(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateMetadataRequest>,
) -> Result<(StatusCode, Json<Metadata>), ApiError> {
    let entry = state.service.create_metadata(req).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_metadata(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<MetadataFilter>,
) -> Result<Json<Vec<Metadata>>, ApiError> {
    Ok(Json(state.service.list_metadata(&filter).await?))
}

pub async fn get_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Metadata>, ApiError> {
    Ok(Json(state.service.get_metadata(&id).await?))
}

pub async fn update_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateMetadataRequest>,
) -> Result<Json<Metadata>, ApiError> {
    Ok(Json(state.service.update_metadata(&id, req).await?))
}

pub async fn delete_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_metadata(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Buckets ───────────────────────────────────────────────────────────────────

pub async fn create_bucket(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateBucketRequest>,
) -> Result<(StatusCode, Json<Bucket>), ApiError> {
    let bucket = state.service.create_bucket(req).await?;
    Ok((StatusCode::CREATED, Json(bucket)))
}

pub async fn list_buckets(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<BucketFilter>,
) -> Result<Json<Vec<Bucket>>, ApiError> {
    Ok(Json(state.service.list_buckets(&filter).await?))
}

pub async fn get_bucket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Bucket>, ApiError> {
    Ok(Json(state.service.get_bucket(&id).await?))
}

pub async fn update_bucket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateBucketRequest>,
) -> Result<Json<Bucket>, ApiError> {
    Ok(Json(state.service.update_bucket(&id, req).await?))
}

pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_bucket(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Objects ───────────────────────────────────────────────────────────────────
//
// The bucket always comes from the URL; a `bucket_id` in the body is ignored.

pub async fn create_object(
    State(state): State<AppState>,
    Path(bucket_id): Path<String>,
    ApiJson(req): ApiJson<CreateObjectRequest>,
) -> Result<(StatusCode, Json<Object>), ApiError> {
    let object = state.service.create_object(&bucket_id, req).await?;
    Ok((StatusCode::CREATED, Json(object)))
}

pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket_id): Path<String>,
    ApiQuery(filter): ApiQuery<ObjectFilter>,
) -> Result<Json<Vec<Object>>, ApiError> {
    Ok(Json(state.service.list_objects(&bucket_id, filter).await?))
}

pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket_id, id)): Path<(String, String)>,
) -> Result<Json<Object>, ApiError> {
    Ok(Json(state.service.get_object(&bucket_id, &id).await?))
}

pub async fn update_object(
    State(state): State<AppState>,
    Path((bucket_id, id)): Path<(String, String)>,
    ApiJson(req): ApiJson<UpdateObjectRequest>,
) -> Result<Json<Object>, ApiError> {
    Ok(Json(state.service.update_object(&bucket_id, &id, req).await?))
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket_id, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_object(&bucket_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
