//! Router configuration for the HTTP API.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use super::handlers::{
    batch_delete, batch_download, delete_entry, download, list_files, upload_files, AppState,
};
use super::middleware::{create_cors_layer, security_headers};
use super::ApiDoc;

/// Create the main API router.
pub fn create_router(app_state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let body_limit = app_state.upload_body_limit();

    // A stored entry may share its name with a static route, so DELETE is
    // mounted on each of them.
    let uploader_routes = Router::new()
        .route(
            "/",
            get(list_files)
                .post(upload_files)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/batch-delete", post(batch_delete).delete(delete_entry))
        .route("/batch-download", post(batch_download).delete(delete_entry))
        .route(
            "/download/*path",
            get(download).post(download).delete(delete_entry),
        )
        .route("/*path", delete(delete_entry));

    let api_routes = Router::new()
        .nest("/uploader", uploader_routes)
        .route("/openapi.json", get(openapi_json));

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins))
                .layer(middleware::from_fn(security_headers)),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/openapi.json - OpenAPI document for the uploader API.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_health_router() {
        let response = create_health_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }
}
