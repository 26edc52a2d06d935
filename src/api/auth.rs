//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Member registration
//! - POST /api/v1/auth/login - Login with username or email
//! - POST /api/v1/auth/logout - End the current session
//! - GET /api/v1/auth/me - Current user

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::api::middleware::{extract_session_token, ApiError, AppState, AuthenticatedUser};
use crate::api::responses::UserResponse;
use crate::models::Session;
use crate::services::user::{LoginInput, RegisterInput, UserServiceError};

/// Request body for registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

/// Routes that need no session
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Routes behind `require_auth`
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
}

fn session_cookie(session: &Session) -> Result<HeaderValue, ApiError> {
    let max_age = (session.expires_at - chrono::Utc::now()).num_seconds().max(0);
    let cookie = format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
        session.id
    );
    HeaderValue::from_str(&cookie).map_err(|e| ApiError::internal(e.into()))
}

/// POST /api/v1/auth/register
///
/// The first account becomes the admin. A session is opened right away.
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let user = state
        .user_service
        .register(RegisterInput::new(body.username, body.email, body.password))
        .await?;

    let (session, user) = state
        .user_service
        .login(LoginInput::new(user.username, password))
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, session_cookie(&session)?);

    Ok((
        StatusCode::CREATED,
        headers,
        Json(AuthResponse {
            user: user.into(),
            token: session.id,
        }),
    ))
}

/// POST /api/v1/auth/login
///
/// Limited to 10 requests per minute per client address and 5 failed
/// attempts per account per 15 minutes, whether it is named by username or email.
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(ip) = client_ip(&headers) {
        if state.rate_limiter.is_ip_limited(ip).await {
            tracing::warn!(%ip, "Login rate limit exceeded for address");
            return Err(ApiError::with_details(
                "RATE_LIMIT",
                "Too many requests, try again later",
                serde_json::json!({ "retry_after": 60 }),
            ));
        }
        state.rate_limiter.record_ip_request(ip).await;
    }

    let throttle_key = state.user_service.login_throttle_key(&body.username_or_email).await?;
    if state.rate_limiter.is_username_limited(&throttle_key).await {
        tracing::warn!(login = %throttle_key, "Login rate limit exceeded for username");
        return Err(ApiError::with_details(
            "RATE_LIMIT",
            "Too many failed attempts, try again in 15 minutes",
            serde_json::json!({ "retry_after": 900 }),
        ));
    }

    let (session, user) = match state
        .user_service
        .login(LoginInput::new(body.username_or_email, body.password))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            if matches!(e, UserServiceError::AuthenticationError(_)) {
                state.rate_limiter.record_failed_attempt(&throttle_key).await;
            }
            return Err(e.into());
        }
    };

    state.rate_limiter.clear_username_attempts(&throttle_key).await;
    tracing::info!(user_id = user.id, "User logged in");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::SET_COOKIE, session_cookie(&session)?);

    Ok((
        response_headers,
        Json(AuthResponse {
            user: user.into(),
            token: session.id,
        }),
    ))
}

/// POST /api/v1/auth/logout
async fn logout(State(state): State<AppState>, request: Request) -> Result<impl IntoResponse, ApiError> {
    let token = extract_session_token(&request).ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;
    state.user_service.logout(&token).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// GET /api/v1/auth/me
async fn get_current_user(user: AuthenticatedUser) -> Json<UserResponse> {
    Json(user.0.into())
}

/// Client address from `X-Forwarded-For` (first hop) or `X-Real-IP`
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next());
    let real = headers.get("x-real-ip").and_then(|h| h.to_str().ok());
    forwarded.or(real).and_then(|ip| ip.trim().parse().ok())
}
