//! HTTP surface of the relay.
//!
//! `/health` and `/openapi.json` are public. Every other route sits behind the
//! shared-secret gate in [`middleware::require_auth`].

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub mod dto;
pub mod error;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod state;

pub use openapi::ApiDoc;
pub use server::{RelayServer, RunningServer};
pub use state::ApiState;

/// Multipart framing allowance on top of the bundle limit
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Build the API router with all routes
pub fn build_router(state: ApiState) -> Router {
    let upload_limit = state
        .config
        .limits
        .max_bundle_bytes
        .saturating_add(FORM_OVERHEAD_BYTES);

    let protected = Router::new()
        .route("/git-exec", post(routes::exec::git_exec))
        .route("/git/fetch-bundle", post(routes::bundle::fetch_bundle))
        .route(
            "/git/push-bundle",
            post(routes::bundle::push_bundle).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/workspace/list", get(routes::workspace::list))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Secret};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn router(dir: &TempDir) -> Router {
        let mut config = Config::default();
        config.auth.secret = Some(Secret::new("router-secret"));
        config.workspace.root = dir.path().to_string_lossy().to_string();
        build_router(ApiState::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_public_routes() {
        let dir = TempDir::new().unwrap();
        for path in ["/health", "/openapi.json"] {
            let response = router(&dir)
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn test_protected_route_needs_secret() {
        let dir = TempDir::new().unwrap();
        let response = router(&dir)
            .oneshot(Request::get("/workspace/list").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router(&dir)
            .oneshot(
                Request::get("/workspace/list")
                    .header("X-Auth-Key", "router-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let dir = TempDir::new().unwrap();
        let response = router(&dir)
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
