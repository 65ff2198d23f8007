//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    delete_handler, get_handler, health_handler, refresh_handler, set_handler, stats_handler,
    AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /set/:key` - Store a value
/// - `GET /get/:key` - Retrieve a value by key
/// - `DELETE /del/:key` - Delete a key
/// - `POST /refresh/:key` - Extend a sliding expiration
/// - `GET /stats` - Get cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set/:key", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/refresh/:key", post(refresh_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, StoreOptions};
    use crate::clock::SystemClock;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    fn create_test_app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let pool =
            CacheStore::build_pool(&dir.path().join("cache.db"), 4, Duration::from_secs(5)).unwrap();
        let store =
            CacheStore::with_clock(pool, StoreOptions::default(), Arc::new(SystemClock)).unwrap();
        store.provision().unwrap();
        (dir, create_router(AppState::new(store)))
    }

    async fn status_of(app: Router, method: &str, uri: &str) -> StatusCode {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn test_routes_reject_wrong_methods() {
        let (_dir, app) = create_test_app();

        assert_eq!(
            status_of(app.clone(), "GET", "/set/key").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            status_of(app.clone(), "GET", "/refresh/key").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            status_of(app, "POST", "/del/key").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn test_over_long_key_rejected_before_store() {
        let (_dir, app) = create_test_app();
        let uri = format!("/get/{}", "k".repeat(crate::cache::MAX_ID_LENGTH + 1));

        assert_eq!(status_of(app, "GET", &uri).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_absolute_query_rejected() {
        let (_dir, app) = create_test_app();

        assert_eq!(
            status_of(app, "PUT", "/set/key?absolute=tomorrow").await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (_dir, app) = create_test_app();

        assert_eq!(status_of(app, "GET", "/keys").await, StatusCode::NOT_FOUND);
    }
}
