//! Wiki API endpoints
//!
//! - GET /api/v1/wiki - Page listing in the request language
//! - GET /api/v1/wiki/{slug} - One page with language fallback
//! - POST /api/v1/wiki - Create a page (editor)
//! - PUT /api/v1/wiki/{slug}/translations - Add or replace a translation (editor)
//! - POST /api/v1/wiki/{slug}/publish, /unpublish (editor)
//! - DELETE /api/v1/wiki/{slug} (editor)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, Editor, Lang, MaybeUser};
use crate::models::{CreateWikiPageInput, WikiPage, WikiPageSummary, WikiPageView, WikiTranslationInput};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pages).post(create_page))
        .route("/{slug}", get(get_page).delete(delete_page))
        .route("/{slug}/translations", put(upsert_translation))
        .route("/{slug}/publish", post(publish_page))
        .route("/{slug}/unpublish", post(unpublish_page))
}

/// Editors also see unpublished pages
async fn list_pages(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Lang(language): Lang,
) -> Result<Json<Vec<WikiPageSummary>>, ApiError> {
    let pages = state
        .wiki_service
        .list_pages(&language, viewer.is_moderator())
        .await?;
    Ok(Json(pages))
}

async fn get_page(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Lang(language): Lang,
    Path(slug): Path<String>,
) -> Result<Json<WikiPageView>, ApiError> {
    let view = state
        .wiki_service
        .get_page(&slug, &language, viewer.is_moderator())
        .await?;
    Ok(Json(view))
}

async fn create_page(
    State(state): State<AppState>,
    Editor(user): Editor,
    Json(body): Json<CreateWikiPageInput>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.wiki_service.create_page(body, Some(user.id)).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn upsert_translation(
    State(state): State<AppState>,
    _editor: Editor,
    Path(slug): Path<String>,
    Json(body): Json<WikiTranslationInput>,
) -> Result<Json<WikiPageView>, ApiError> {
    Ok(Json(state.wiki_service.upsert_translation(&slug, body).await?))
}

async fn publish_page(
    State(state): State<AppState>,
    _editor: Editor,
    Path(slug): Path<String>,
) -> Result<Json<WikiPage>, ApiError> {
    Ok(Json(state.wiki_service.set_published(&slug, true).await?))
}

async fn unpublish_page(
    State(state): State<AppState>,
    _editor: Editor,
    Path(slug): Path<String>,
) -> Result<Json<WikiPage>, ApiError> {
    Ok(Json(state.wiki_service.set_published(&slug, false).await?))
}

async fn delete_page(
    State(state): State<AppState>,
    _editor: Editor,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.wiki_service.delete_page(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}
