//! Social network endpoints
//!
//! Reads are public unless noted; writes need a session.
//!
//! - Posts: POST /posts, GET|PUT|DELETE /posts/{id}
//! - Comments: GET|POST /posts/{id}/comments, DELETE /comments/{id}
//! - Likes and shares: POST|DELETE /posts/{id}/like, POST /posts/{id}/share
//! - Reports: POST /posts/{id}/report, POST /comments/{id}/report
//! - Feeds: GET /feed (session), GET /users/{username}/posts, GET /hashtags/{tag}
//! - People: GET /users/{username}, /followers, /following, POST|DELETE /follow
//! - GET /hashtags/trending

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, MaybeUser};
use crate::api::responses::PageResponse;
use crate::models::{Comment, Post, PostDetail, Report, ReportTarget, Share, TrendingHashtag, User, UserProfile};
use crate::services::SocialProfile;

#[derive(Debug, Deserialize)]
pub struct ContentRequest {
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShareRequest {
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    #[serde(default = "default_trending_limit")]
    pub limit: i64,
}

fn default_trending_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub following: bool,
    /// False when the call did not change anything
    pub changed: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route("/posts/{id}", get(get_post).put(edit_post).delete(delete_post))
        .route("/posts/{id}/comments", get(list_comments).post(add_comment))
        .route("/posts/{id}/like", post(like_post).delete(unlike_post))
        .route("/posts/{id}/share", post(share_post))
        .route("/posts/{id}/report", post(report_post))
        .route("/comments/{id}", delete(delete_comment))
        .route("/comments/{id}/report", post(report_comment))
        .route("/feed", get(home_feed))
        .route("/users/{username}", get(profile))
        .route("/users/{username}/posts", get(user_posts))
        .route("/users/{username}/followers", get(followers))
        .route("/users/{username}/following", get(following))
        .route("/users/{username}/follow", post(follow).delete(unfollow))
        .route("/hashtags/trending", get(trending_hashtags))
        .route("/hashtags/{tag}", get(hashtag_feed))
}

// ============================================================================
// Posts
// ============================================================================

async fn create_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<ContentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state.social_service.create_post(&user, &body.content).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
) -> Result<Json<PostDetail>, ApiError> {
    Ok(Json(state.social_service.get_post(viewer.user(), id).await?))
}

async fn edit_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<ContentRequest>,
) -> Result<Json<PostDetail>, ApiError> {
    Ok(Json(state.social_service.edit_post(&user, id, &body.content).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.social_service.delete_post(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Comments
// ============================================================================

async fn list_comments(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PageResponse<Comment>>, ApiError> {
    let paged = state
        .social_service
        .list_comments(viewer.user(), id, query.page, query.per_page)
        .await?;
    Ok(Json(paged.into()))
}

async fn add_comment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<ContentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state.social_service.add_comment(&user, id, &body.content).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn delete_comment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.social_service.delete_comment(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Likes, shares and reports
// ============================================================================

async fn like_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<PostDetail>, ApiError> {
    Ok(Json(state.social_service.like(&user, id).await?))
}

async fn unlike_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<PostDetail>, ApiError> {
    Ok(Json(state.social_service.unlike(&user, id).await?))
}

/// The body is optional; an empty request shares without a comment
async fn share_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<ShareRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let share: Share = state
        .social_service
        .share(&user, id, body.comment.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(share)))
}

async fn report_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<ReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    file_report(&state, &user, ReportTarget::Post, id, &body.reason).await
}

async fn report_comment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<ReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    file_report(&state, &user, ReportTarget::Comment, id, &body.reason).await
}

async fn file_report(
    state: &AppState,
    user: &User,
    target: ReportTarget,
    id: i64,
    reason: &str,
) -> Result<(StatusCode, Json<Report>), ApiError> {
    let report = state.moderation_service.report(user, target, id, reason).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

// ============================================================================
// Feeds and people
// ============================================================================

async fn home_feed(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PageResponse<Post>>, ApiError> {
    let paged = state
        .social_service
        .home_feed(&user, query.page, query.per_page)
        .await?;
    Ok(Json(paged.into()))
}

async fn profile(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(username): Path<String>,
) -> Result<Json<SocialProfile>, ApiError> {
    Ok(Json(state.social_service.profile(viewer.user(), &username).await?))
}

async fn user_posts(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(username): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PageResponse<Post>>, ApiError> {
    let paged = state
        .social_service
        .user_posts(viewer.user(), &username, query.page, query.per_page)
        .await?;
    Ok(Json(paged.into()))
}

async fn followers(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PageResponse<UserProfile>>, ApiError> {
    let paged = state
        .social_service
        .followers(&username, query.page, query.per_page)
        .await?;
    Ok(Json(paged.into()))
}

async fn following(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PageResponse<UserProfile>>, ApiError> {
    let paged = state
        .social_service
        .following(&username, query.page, query.per_page)
        .await?;
    Ok(Json(paged.into()))
}

async fn follow(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<Json<FollowResponse>, ApiError> {
    let changed = state.social_service.follow(&user, &username).await?;
    Ok(Json(FollowResponse { following: true, changed }))
}

async fn unfollow(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<Json<FollowResponse>, ApiError> {
    let changed = state.social_service.unfollow(&user, &username).await?;
    Ok(Json(FollowResponse { following: false, changed }))
}

// ============================================================================
// Hashtags
// ============================================================================

async fn trending_hashtags(
    State(state): State<AppState>,
    Query(query): Query<TrendingQuery>,
) -> Result<Json<Vec<TrendingHashtag>>, ApiError> {
    Ok(Json(state.social_service.trending_hashtags(query.limit).await?))
}

async fn hashtag_feed(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PageResponse<Post>>, ApiError> {
    let paged = state
        .social_service
        .hashtag_feed(&tag, query.page, query.per_page)
        .await?;
    Ok(Json(paged.into()))
}
