//! API layer - HTTP handlers and routing
//!
//! Every endpoint lives under `/api/v1`:
//! - `/health` and `/auth` (register, login, logout, me)
//! - `/wiki` and `/news` (public reads, editor writes)
//! - `/social` (posts, comments, likes, shares, follows, hashtags, reports)
//! - `/notifications` (signed-in members)
//! - `/admin` (resource gate, users, reports, word filters, moderation log)

pub mod admin;
pub mod auth;
pub mod common;
pub mod middleware;
pub mod news;
pub mod notifications;
pub mod responses;
pub mod social;
pub mod wiki;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, API_PREFIX};

/// Build the router mounted under `/api/v1`
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need a session, any role)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/notifications", notifications::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Content routes: reads are public, handlers ask for a user where needed
    let content_routes = Router::new()
        .nest("/wiki", wiki::router())
        .nest("/news", news::router())
        .nest("/social", social::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::optional_auth,
        ));

    // Public routes
    Router::new()
        .route("/health", get(common::health))
        .nest("/auth", auth::public_router())
        .merge(admin_routes)
        .merge(protected_routes)
        .merge(content_routes)
}

/// Build the complete router with middleware
///
/// The resource gate wraps the whole tree so it sees the full request path.
pub fn build_router(state: AppState) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::COOKIE,
            header::ACCEPT_LANGUAGE,
        ])
        .allow_credentials(true);
    match state.config.server.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(e) => tracing::warn!(
            origin = %state.config.server.cors_origin,
            "Ignoring invalid CORS origin: {e}"
        ),
    }

    Router::new()
        .nest(API_PREFIX, build_api_router(state.clone()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::resource_gate,
        ))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::Config;
    use crate::db::repositories::test_support::setup_pool;
    use crate::models::CreateResourceInput;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let pool = setup_pool().await;
        AppState::new(pool, Arc::new(MemoryCache::new()), Config::default())
    }

    async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(app: &Router, username: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "correct-horse",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state().await);
        let (status, body) = send(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], true);
    }

    #[tokio::test]
    async fn test_auth_flow() {
        let app = build_router(test_state().await);
        let token = register(&app, "founder").await;

        let (status, me) = send(&app, "GET", "/api/v1/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["username"], "founder");
        assert_eq!(me["role"], "admin");
        assert!(me.get("password_hash").is_none());

        let (status, _) = send(&app, "POST", "/api/v1/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&app, "GET", "/api/v1/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let app = build_router(test_state().await);
        register(&app, "founder").await;
        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username_or_email": "founder", "password": "nope-nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_failed_logins_count_per_account() {
        let app = build_router(test_state().await);
        register(&app, "alice").await;
        let attempt = |login: &'static str, password: &'static str| {
            Some(json!({ "username_or_email": login, "password": password }))
        };

        for login in ["alice", "alice@example.com", "Alice", "ALICE@example.com", "alice"] {
            let (status, _) = send(&app, "POST", "/api/v1/auth/login", None, attempt(login, "wrong-guess")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        // Locked out under every name, even with the right password
        for login in ["alice@example.com", "ALICE", "alice"] {
            let (status, body) = send(&app, "POST", "/api/v1/auth/login", None, attempt(login, "correct-horse")).await;
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(body["error"]["code"], "RATE_LIMIT");
        }
    }

    #[tokio::test]
    async fn test_wiki_writes_need_editor() {
        let app = build_router(test_state().await);
        let admin = register(&app, "founder").await;
        let member = register(&app, "visitor").await;
        let page = json!({ "language": "en", "title": "House Rules", "content": "Be kind.", "publish": true });

        let (status, _) = send(&app, "POST", "/api/v1/wiki", None, Some(page.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, "POST", "/api/v1/wiki", Some(&member), Some(page.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, created) = send(&app, "POST", "/api/v1/wiki", Some(&admin), Some(page)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["slug"], "house-rules");

        let (status, view) = send(&app, "GET", "/api/v1/wiki/house-rules?lang=de", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["is_fallback"], true);
        assert_eq!(view["translation"]["language"], "en");
    }

    #[tokio::test]
    async fn test_admin_routes_need_admin() {
        let app = build_router(test_state().await);
        let _admin = register(&app, "founder").await;
        let member = register(&app, "visitor").await;
        let (status, _) = send(&app, "GET", "/api/v1/admin/resources", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, "GET", "/api/v1/admin/resources", Some(&member), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_disabled_resource_is_gated() {
        let state = test_state().await;
        let resource = state
            .gate_service
            .create(CreateResourceInput {
                name: "social".to_string(),
                path_prefix: "/social".to_string(),
                parent_id: None,
                is_active: false,
                description: None,
            })
            .await
            .unwrap();
        let app = build_router(state.clone());

        let (status, body) = send(&app, "GET", "/api/v1/social/hashtags/trending", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "RESOURCE_DISABLED");

        // Other prefixes and exempt routes are untouched
        let (status, _) = send(&app, "GET", "/api/v1/wiki", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);

        state.gate_service.set_active(resource.id, true).await.unwrap();
        let (status, _) = send(&app, "GET", "/api/v1/social/hashtags/trending", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_social_post_and_notification() {
        let app = build_router(test_state().await);
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;

        let (status, post) = send(
            &app,
            "POST",
            "/api/v1/social/posts",
            Some(&alice),
            Some(json!({ "content": "Hello #bastion" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let post_id = post["id"].as_i64().unwrap();

        let (status, liked) = send(&app, "POST", &format!("/api/v1/social/posts/{post_id}/like"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(liked["like_count"], 1);
        assert_eq!(liked["liked"], true);

        let (status, count) = send(&app, "GET", "/api/v1/notifications/unread-count", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(count["count"], 1);

        let (status, feed) = send(&app, "GET", "/api/v1/social/hashtags/bastion", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(feed["total"], 1);
    }
}
