//! HTTP transport for Filedock.
//!
//! Thin axum layer over [`crate::storage`]: parses multipart uploads and JSON
//! bodies, and streams files and zip archives back to the client.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

use utoipa::OpenApi;

pub use error::ApiError;
pub use router::{create_health_router, create_router};
pub use server::WebServer;

/// OpenAPI description of the uploader API.
#[derive(OpenApi)]
#[openapi(
    info(title = "Filedock API", description = "Upload, browse, delete and download stored files"),
    paths(
        handlers::uploader::list_files,
        handlers::uploader::upload_files,
        handlers::uploader::delete_entry,
        handlers::uploader::download,
        handlers::uploader::batch_delete,
        handlers::uploader::batch_download,
    ),
    components(schemas(
        dto::FileInfoResponse,
        dto::UploadResponse,
        dto::DeleteResultResponse,
        dto::MessageResponse,
        dto::BatchPathsRequest,
        error::ErrorBody,
        error::ErrorDetail,
        error::ErrorCode,
    )),
    tags((name = "uploader", description = "Stored files and directories"))
)]
pub struct ApiDoc;
