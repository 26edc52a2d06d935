//! API middleware
//!
//! Contains middleware and extractors for:
//! - Authentication (session token validation)
//! - Authorization (admin middleware, editor extractor)
//! - Resource gating (per-prefix on/off switches)
//! - Language selection for translated content

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::SharedCache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxCommentRepository, SqlxFollowRepository, SqlxModerationRepository, SqlxNewsRepository,
    SqlxNotificationRepository, SqlxPostRepository, SqlxResourceRepository, SqlxSessionRepository,
    SqlxUserRepository, SqlxWikiRepository, SqlxWordFilterRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::content::{resolve_language, ContentServiceError};
use crate::services::gate::{matches_prefix, GateDecision, GateService, GateServiceError};
use crate::services::moderation::{ModerationService, ModerationServiceError};
use crate::services::news::NewsService;
use crate::services::notification::{NotificationService, NotificationServiceError};
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::social::{SocialService, SocialServiceError};
use crate::services::user::{UserService, UserServiceError};
use crate::services::wiki::WikiService;
use crate::services::word_filter::{WordFilterError, WordFilterService};

/// Prefix every API route is mounted under
pub const API_PREFIX: &str = "/api/v1";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub config: Arc<Config>,
    pub cache: SharedCache,
    pub user_service: Arc<UserService>,
    pub gate_service: Arc<GateService>,
    pub wiki_service: Arc<WikiService>,
    pub news_service: Arc<NewsService>,
    pub social_service: Arc<SocialService>,
    pub notification_service: Arc<NotificationService>,
    pub moderation_service: Arc<ModerationService>,
    pub word_filter_service: Arc<WordFilterService>,
    pub rate_limiter: Arc<LoginRateLimiter>,
}

impl AppState {
    /// Wire repositories and services over one pool and cache
    pub fn new(pool: DynDatabasePool, cache: SharedCache, config: Config) -> Self {
        let content_ttl = Duration::from_secs(config.cache.ttl_seconds);
        let gate_ttl = Duration::from_secs(config.gate.cache_ttl_seconds);

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let post_repo = SqlxPostRepository::boxed(pool.clone());
        let comment_repo = SqlxCommentRepository::boxed(pool.clone());

        let user_service = Arc::new(UserService::with_session_days(
            user_repo.clone(),
            SqlxSessionRepository::boxed(pool.clone()),
            config.site.session_days,
        ));
        let notification_service = Arc::new(NotificationService::new(SqlxNotificationRepository::boxed(
            pool.clone(),
        )));
        let word_filter_service = Arc::new(WordFilterService::new(
            SqlxWordFilterRepository::boxed(pool.clone()),
            cache.clone(),
        ));
        let social_service = Arc::new(SocialService::new(
            post_repo.clone(),
            comment_repo.clone(),
            SqlxFollowRepository::boxed(pool.clone()),
            user_repo,
            notification_service.clone(),
            word_filter_service.clone(),
        ));
        let moderation_service = Arc::new(ModerationService::new(
            SqlxModerationRepository::boxed(pool.clone()),
            post_repo,
            comment_repo,
            user_service.clone(),
            notification_service.clone(),
        ));

        Self {
            gate_service: Arc::new(GateService::new(
                SqlxResourceRepository::boxed(pool.clone()),
                cache.clone(),
                gate_ttl,
            )),
            wiki_service: Arc::new(WikiService::new(
                SqlxWikiRepository::boxed(pool.clone()),
                cache.clone(),
                content_ttl,
                config.site.clone(),
            )),
            news_service: Arc::new(NewsService::new(
                SqlxNewsRepository::boxed(pool.clone()),
                cache.clone(),
                content_ttl,
                config.site.clone(),
            )),
            pool,
            config: Arc::new(config),
            cache,
            user_service,
            social_service,
            notification_service,
            moderation_service,
            word_filter_service,
            rate_limiter: Arc::new(LoginRateLimiter::new()),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(code: impl Into<String>, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    /// Log the cause and hide it from the client
    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!("Request failed: {err:#}");
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" | "USER_BANNED" => StatusCode::FORBIDDEN,
            "NOT_FOUND" | "RESOURCE_DISABLED" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::Banned => ApiError::new("USER_BANNED", "Account is banned"),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::NotFound => ApiError::not_found("User not found"),
            UserServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<ContentServiceError> for ApiError {
    fn from(err: ContentServiceError) -> Self {
        match err {
            ContentServiceError::NotFound => ApiError::not_found("Content not found"),
            ContentServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            ContentServiceError::Conflict(msg) => ApiError::conflict(msg),
            ContentServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<GateServiceError> for ApiError {
    fn from(err: GateServiceError) -> Self {
        match err {
            GateServiceError::NotFound => ApiError::not_found("Resource not found"),
            GateServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            GateServiceError::Conflict(msg) => ApiError::conflict(msg),
            GateServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<SocialServiceError> for ApiError {
    fn from(err: SocialServiceError) -> Self {
        match err {
            SocialServiceError::NotFound => ApiError::not_found("Not found"),
            SocialServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            SocialServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            SocialServiceError::Conflict(msg) => ApiError::conflict(msg),
            SocialServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<NotificationServiceError> for ApiError {
    fn from(err: NotificationServiceError) -> Self {
        match err {
            NotificationServiceError::NotFound => ApiError::not_found("Notification not found"),
            NotificationServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<ModerationServiceError> for ApiError {
    fn from(err: ModerationServiceError) -> Self {
        match err {
            ModerationServiceError::NotFound => ApiError::not_found("Not found"),
            ModerationServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            ModerationServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            ModerationServiceError::Conflict(msg) => ApiError::conflict(msg),
            ModerationServiceError::InternalError(e) => ApiError::internal(e),
        }
    }
}

impl From<WordFilterError> for ApiError {
    fn from(err: WordFilterError) -> Self {
        match err {
            WordFilterError::NotFound => ApiError::not_found("Word filter not found"),
            WordFilterError::ValidationError(msg) => ApiError::validation_error(msg),
            WordFilterError::InternalError(e) => ApiError::internal(e),
        }
    }
}

// ============================================================================
// Extractors
// ============================================================================

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// A moderator or admin; 401 without a session, 403 for members
#[derive(Debug, Clone)]
pub struct Editor(pub User);

impl<S> FromRequestParts<S> for Editor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_moderator() {
            return Err(ApiError::forbidden("Editor privileges required"));
        }
        Ok(Editor(user))
    }
}

/// The signed-in user when there is one (requires [`optional_auth`])
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl MaybeUser {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }

    pub fn is_moderator(&self) -> bool {
        self.0.as_ref().is_some_and(User::is_moderator)
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<AuthenticatedUser>().map(|u| u.0.clone())))
    }
}

/// Content language: `?lang=`, then the first `Accept-Language` tag, then
/// the site default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lang(pub String);

impl FromRequestParts<AppState> for Lang {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let query = parts.uri.query().and_then(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "lang")
                .map(|(_, value)| value)
        });
        let accept = parts
            .headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|h| h.to_str().ok());
        Ok(Lang(resolve_language(query, accept, &state.config.site)))
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Extract session token from the `Authorization: Bearer` header or the
/// `session` cookie
pub(crate) fn extract_session_token(request: &Request) -> Option<String> {
    if let Some(auth_header) = request.headers().get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    request
        .headers()
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|c| c.trim().strip_prefix("session=").map(str::to_string))
        })
        .filter(|token| !token.is_empty())
}

/// Authentication middleware
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let token = extract_session_token(&request).ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let user = state
        .user_service
        .validate_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// Optional authentication middleware
pub async fn optional_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(token) = extract_session_token(&request) {
        match state.user_service.validate_session(&token).await {
            Ok(Some(user)) => {
                request.extensions_mut().insert(AuthenticatedUser(user));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Session lookup failed: {e}"),
        }
    }
    next.run(request).await
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// Path as seen by the gate: `/api/v1` stripped, `None` outside the API
pub(crate) fn gated_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(API_PREFIX)?;
    match rest {
        "" => Some("/"),
        _ if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

/// Resource gate middleware
///
/// Requests under a disabled resource get 404 `RESOURCE_DISABLED`. Exempt
/// prefixes always pass so a disabled resource can be switched back on.
pub async fn resource_gate(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, ApiError> {
    let gate = &state.config.gate;
    let path = request.uri().path();
    if !gate.enabled || gate.exempt_prefixes.iter().any(|p| matches_prefix(path, p)) {
        return Ok(next.run(request).await);
    }

    if let Some(gated) = gated_path(path) {
        if let GateDecision::Deny { resource } = state.gate_service.check(gated).await {
            tracing::debug!(path, %resource, "Request blocked by resource gate");
            return Err(ApiError::new(
                "RESOURCE_DISABLED",
                format!("'{resource}' is currently disabled"),
            ));
        }
    }

    Ok(next.run(request).await)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(name: header::HeaderName, value: &str) -> Request<Body> {
        Request::builder().uri("/test").header(name, value).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let request = request_with(header::AUTHORIZATION, "Bearer test-token-123");
        assert_eq!(extract_session_token(&request), Some("test-token-123".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let request = request_with(header::COOKIE, "theme=dark; session=test-token-456");
        assert_eq!(extract_session_token(&request), Some("test-token-456".to_string()));
    }

    #[test]
    fn test_extract_session_token_bearer_priority() {
        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer bearer-token")
            .header(header::COOKIE, "session=cookie-token")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_session_token(&request), Some("bearer-token".to_string()));
    }

    #[test]
    fn test_extract_session_token_none() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        assert!(extract_session_token(&request).is_none());
        assert!(extract_session_token(&request_with(header::AUTHORIZATION, "Basic abc")).is_none());
        assert!(extract_session_token(&request_with(header::COOKIE, "session=")).is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::new("RESOURCE_DISABLED", "x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::new("RATE_LIMIT", "x").status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::new("SOMETHING_ELSE", "x").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_service_errors_map_to_codes() {
        let banned: ApiError = UserServiceError::Banned.into();
        assert_eq!(banned.error.code, "USER_BANNED");
        let forbidden: ApiError = SocialServiceError::Forbidden("no".to_string()).into();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        let internal: ApiError = ContentServiceError::InternalError(anyhow::anyhow!("db down")).into();
        assert_eq!(internal.error.message, "Internal server error");
    }

    #[test]
    fn test_gated_path() {
        assert_eq!(gated_path("/api/v1/wiki/rules"), Some("/wiki/rules"));
        assert_eq!(gated_path("/api/v1"), Some("/"));
        assert_eq!(gated_path("/api/v10/wiki"), None);
        assert_eq!(gated_path("/health"), None);
    }
}
