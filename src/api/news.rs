//! News and system update endpoints
//!
//! - GET /api/v1/news?kind=news|update - Published entries, newest first
//! - GET /api/v1/news/{slug}
//! - POST /api/v1/news, PUT /{slug}/translations, POST /{slug}/publish,
//!   POST /{slug}/unpublish, DELETE /{slug} (editor)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState, Editor, Lang, MaybeUser};
use crate::api::responses::PageResponse;
use crate::models::{CreateNewsInput, NewsEntry, NewsKind, NewsSummary, NewsTranslationInput, NewsView};

#[derive(Debug, Deserialize)]
pub struct NewsListQuery {
    #[serde(default)]
    pub kind: NewsKind,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_news).post(create_news))
        .route("/{slug}", get(get_news).delete(delete_news))
        .route("/{slug}/translations", put(upsert_translation))
        .route("/{slug}/publish", post(publish_news))
        .route("/{slug}/unpublish", post(unpublish_news))
}

async fn list_news(
    State(state): State<AppState>,
    Lang(language): Lang,
    Query(query): Query<NewsListQuery>,
) -> Result<Json<PageResponse<NewsSummary>>, ApiError> {
    let paged = state
        .news_service
        .list(query.kind, &language, query.page, query.per_page)
        .await?;
    Ok(Json(paged.into()))
}

async fn get_news(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Lang(language): Lang,
    Path(slug): Path<String>,
) -> Result<Json<NewsView>, ApiError> {
    let view = state
        .news_service
        .get(&slug, &language, viewer.is_moderator())
        .await?;
    Ok(Json(view))
}

async fn create_news(
    State(state): State<AppState>,
    Editor(user): Editor,
    Json(body): Json<CreateNewsInput>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.news_service.create(body, Some(user.id)).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn upsert_translation(
    State(state): State<AppState>,
    _editor: Editor,
    Path(slug): Path<String>,
    Json(body): Json<NewsTranslationInput>,
) -> Result<Json<NewsView>, ApiError> {
    Ok(Json(state.news_service.upsert_translation(&slug, body).await?))
}

async fn publish_news(
    State(state): State<AppState>,
    _editor: Editor,
    Path(slug): Path<String>,
) -> Result<Json<NewsEntry>, ApiError> {
    Ok(Json(state.news_service.publish(&slug).await?))
}

async fn unpublish_news(
    State(state): State<AppState>,
    _editor: Editor,
    Path(slug): Path<String>,
) -> Result<Json<NewsEntry>, ApiError> {
    Ok(Json(state.news_service.unpublish(&slug).await?))
}

async fn delete_news(
    State(state): State<AppState>,
    _editor: Editor,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.news_service.delete(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}
