//! Admin API endpoints
//!
//! Every route here sits behind `require_auth` and `require_admin`.
//!
//! - Resources (gate table): GET|POST /resources, GET|PUT|DELETE /resources/{id},
//!   POST /resources/{id}/active
//! - Users: GET /users, PUT /users/{id}/role, POST /users/{id}/ban, POST /users/{id}/unban
//! - Posts: POST /posts/{id}/hide, POST /posts/{id}/unhide
//! - Reports: GET /reports?status=, POST /reports/{id}/resolve
//! - Word filters: GET|POST /filters, DELETE /filters/{id}, POST /filters/clean
//! - GET /moderation-log

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page, PaginationQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{PageResponse, UserResponse};
use crate::models::{
    CreateResourceInput, ModerationAction, ModerationLogEntry, Report, ReportStatus, Resource,
    UpdateResourceInput, UserRole, WordFilter,
};
use crate::services::FilterCleanup;

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Default, Deserialize)]
pub struct BanRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportListQuery {
    pub status: Option<ReportStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub action: ModerationAction,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub pattern: String,
    #[serde(default = "default_filter_active")]
    pub is_active: bool,
}

fn default_filter_active() -> bool {
    true
}

pub fn router() -> Router<AppState> {
    Router::new()
        // Resources
        .route("/resources", get(list_resources).post(create_resource))
        .route(
            "/resources/{id}",
            get(get_resource).put(update_resource).delete(delete_resource),
        )
        .route("/resources/{id}/active", post(set_resource_active))
        // Users
        .route("/users", get(list_users))
        .route("/users/{id}/role", put(set_user_role))
        .route("/users/{id}/ban", post(ban_user))
        .route("/users/{id}/unban", post(unban_user))
        // Posts
        .route("/posts/{id}/hide", post(hide_post))
        .route("/posts/{id}/unhide", post(unhide_post))
        // Reports
        .route("/reports", get(list_reports))
        .route("/reports/{id}/resolve", post(resolve_report))
        // Word filters
        .route("/filters", get(list_filters).post(add_filter))
        .route("/filters/clean", post(clean_filters))
        .route("/filters/{id}", delete(delete_filter))
        .route("/moderation-log", get(moderation_log))
}

// ============================================================================
// Resources
// ============================================================================

async fn list_resources(State(state): State<AppState>) -> Result<Json<Vec<Resource>>, ApiError> {
    Ok(Json(state.gate_service.list().await?))
}

async fn get_resource(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Resource>, ApiError> {
    Ok(Json(state.gate_service.get(id).await?))
}

async fn create_resource(
    State(state): State<AppState>,
    Json(body): Json<CreateResourceInput>,
) -> Result<impl IntoResponse, ApiError> {
    let resource = state.gate_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(resource)))
}

async fn update_resource(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateResourceInput>,
) -> Result<Json<Resource>, ApiError> {
    Ok(Json(state.gate_service.update(id, body).await?))
}

async fn set_resource_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ActiveRequest>,
) -> Result<Json<Resource>, ApiError> {
    Ok(Json(state.gate_service.set_active(id, body.is_active).await?))
}

async fn delete_resource(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.gate_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Users
// ============================================================================

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PageResponse<UserResponse>>, ApiError> {
    let paged = state.user_service.list(query.page, query.per_page).await?;
    Ok(Json(paged.map(UserResponse::from).into()))
}

/// Admins cannot change their own role
async fn set_user_role(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<RoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if admin.id == id {
        return Err(ApiError::validation_error("You cannot change your own role"));
    }
    let user = state.user_service.set_role(id, body.role).await?;
    tracing::info!(user_id = id, role = %body.role, "User role changed");
    Ok(Json(user.into()))
}

async fn ban_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<BanRequest>>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body.unwrap_or_default();
    state.moderation_service.ban_user(&admin, id, &body.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unban_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.moderation_service.unban_user(&admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Posts and reports
// ============================================================================

async fn hide_post(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.moderation_service.hide_post(&admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unhide_post(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.moderation_service.unhide_post(&admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportListQuery>,
) -> Result<Json<PageResponse<Report>>, ApiError> {
    let paged = state
        .moderation_service
        .list_reports(query.status, query.page, query.per_page)
        .await?;
    Ok(Json(paged.into()))
}

async fn resolve_report(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<Report>, ApiError> {
    Ok(Json(state.moderation_service.resolve(&admin, id, body.action).await?))
}

async fn moderation_log(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PageResponse<ModerationLogEntry>>, ApiError> {
    let paged = state.moderation_service.list_log(query.page, query.per_page).await?;
    Ok(Json(paged.into()))
}

// ============================================================================
// Word filters
// ============================================================================

async fn list_filters(State(state): State<AppState>) -> Result<Json<Vec<WordFilter>>, ApiError> {
    Ok(Json(state.word_filter_service.list_filters().await?))
}

async fn add_filter(
    State(state): State<AppState>,
    Json(body): Json<FilterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = state
        .word_filter_service
        .add_filter(&body.pattern, body.is_active)
        .await?;
    Ok((StatusCode::CREATED, Json(filter)))
}

async fn delete_filter(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.word_filter_service.remove_filter(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clean_filters(State(state): State<AppState>) -> Result<Json<FilterCleanup>, ApiError> {
    Ok(Json(state.word_filter_service.clean().await?))
}
