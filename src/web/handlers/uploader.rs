//! Uploader handlers: listing, multipart upload, delete and downloads.

use axum::{
    body::Body,
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::storage::{
    spawn_archive, ArchiveJob, FileService, PathHint, PathInput, UploadCoordinator, UploadHints,
    UploadedFile,
};
use crate::web::dto::{
    ApiResponse, BatchPathsRequest, DeleteResultResponse, FileInfoResponse, MessageResponse,
    UploadResponse, ValidatedJson,
};
use crate::web::error::ApiError;
use crate::DockError;

/// Attachment name for batch downloads, without the `.zip` suffix.
const BATCH_ARCHIVE_NAME: &str = "batch-download";

/// Request headers forwarded to the file server for conditional and range requests.
const FORWARDED_HEADERS: [header::HeaderName; 4] = [
    header::RANGE,
    header::IF_RANGE,
    header::IF_MODIFIED_SINCE,
    header::IF_UNMODIFIED_SINCE,
];

/// Shared state for the uploader routes.
pub struct AppState {
    pub files: FileService,
    /// Maximum size of a single uploaded file in bytes.
    pub max_file_size: u64,
    /// Maximum number of files per upload request.
    pub max_files: usize,
}

impl AppState {
    pub fn new(files: FileService, max_file_size: u64, max_files: usize) -> Self {
        Self {
            files,
            max_file_size,
            max_files,
        }
    }

    /// Upper bound for a whole multipart request body.
    pub fn upload_body_limit(&self) -> usize {
        let files = self.max_file_size.saturating_mul(self.max_files as u64);
        usize::try_from(files.saturating_add(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

/// Generate a safe Content-Disposition header value for downloads.
///
/// The plain `filename` parameter is an ASCII fallback: control characters are
/// dropped, quotes, backslashes and non-ASCII characters become `_`. The exact
/// name is sent percent-encoded in an RFC 5987 `filename*` parameter.
pub fn content_disposition_header(filename: &str) -> String {
    let needs_encoding = !filename.is_ascii()
        || filename
            .chars()
            .any(|c| c.is_control() || c == '"' || c == '\\');

    if !needs_encoding {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() => '_',
            _ => c,
        })
        .collect();
    let encoded = urlencoding::encode(filename);

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

fn disposition_value(filename: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&content_disposition_header(filename))
        .map_err(|e| ApiError::from(DockError::Internal(e.to_string())))
}

/// GET /api/uploader - List the storage tree.
#[utoipa::path(
    get,
    path = "/api/uploader",
    tag = "uploader",
    responses(
        (status = 200, description = "Storage tree, directories first then newest first", body = [FileInfoResponse])
    )
)]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<FileInfoResponse>>> {
    let tree = state.files.list().await;
    Json(ApiResponse::new(
        tree.into_iter().map(FileInfoResponse::from).collect(),
    ))
}

/// Files and addressing hints collected from one multipart request.
#[derive(Default)]
struct UploadForm {
    files: Vec<UploadedFile>,
    relative_paths: Vec<String>,
    target_dirs: Vec<String>,
    /// Whether the hints were sent as `relativePath[]` / `targetDir[]`.
    relative_paths_array: bool,
    target_dirs_array: bool,
}

fn multipart_error(e: MultipartError) -> DockError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DockError::PayloadTooLarge(e.body_text())
    } else {
        tracing::warn!("Failed to read multipart data: {}", e);
        DockError::Validation(format!("Invalid multipart data: {}", e.body_text()))
    }
}

/// Stream one file field into `dest`, never holding more than one chunk in memory.
async fn stage_field(field: &mut Field<'_>, dest: &Path, limit: u64) -> Result<u64, DockError> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        if written > limit {
            return Err(DockError::PayloadTooLarge(format!(
                "File too large (max {}MB)",
                limit / 1024 / 1024
            )));
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(written)
}

async fn read_form(
    state: &AppState,
    multipart: &mut Multipart,
    form: &mut UploadForm,
) -> Result<(), DockError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        let file_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        if let Some(file_name) = file_name {
            if form.files.len() >= state.max_files {
                return Err(DockError::Validation(format!(
                    "Too many files (max {})",
                    state.max_files
                )));
            }

            let upload = UploadedFile {
                original_name: file_name,
                temp_path: state.files.store().new_temp_path(),
            };
            let dest = upload.temp_path.clone();
            // Registered before writing so a partial file is cleaned up too.
            form.files.push(upload);

            let size = stage_field(&mut field, &dest, state.max_file_size).await?;
            tracing::debug!(field = %name, size, "Staged upload");
            continue;
        }

        match name.as_str() {
            "relativePath" | "relativePath[]" => {
                form.relative_paths_array |= name.ends_with("[]");
                form.relative_paths
                    .push(field.text().await.map_err(multipart_error)?);
            }
            "targetDir" | "targetDir[]" => {
                form.target_dirs_array |= name.ends_with("[]");
                form.target_dirs
                    .push(field.text().await.map_err(multipart_error)?);
            }
            _ => {
                tracing::debug!(field = %name, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(())
}

/// POST /api/uploader - Upload files.
///
/// Request body: multipart/form-data. Every part with a filename is a file.
/// Optional text parts `relativePath` and `targetDir` address the files; send
/// one value for all files or repeat the part once per file. Values sent as
/// `relativePath[]` / `targetDir[]` always pair up with files by position.
#[utoipa::path(
    post,
    path = "/api/uploader",
    tag = "uploader",
    responses(
        (status = 200, description = "Files uploaded", body = UploadResponse),
        (status = 400, description = "Invalid path, malformed form or too many files", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody)
    )
)]
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResponse>>, ApiError> {
    let mut form = UploadForm::default();

    if let Err(e) = read_form(&state, &mut multipart, &mut form).await {
        UploadCoordinator::new(state.files.store())
            .cleanup(&form.files)
            .await;
        return Err(e.into());
    }

    if form.files.is_empty() {
        return Err(DockError::Validation("No files provided".to_string()).into());
    }

    let hints = UploadHints {
        relative_path: PathHint::from_values(form.relative_paths, form.relative_paths_array),
        target_dir: PathHint::from_values(form.target_dirs, form.target_dirs_array),
    };
    let uploaded = state.files.upload(&form.files, &hints).await?;

    Ok(Json(ApiResponse::new(UploadResponse {
        success: true,
        uploaded,
    })))
}

/// Split the wildcard part of a request path into decoded segments.
fn wildcard_segments(uri: &Uri) -> Result<Vec<String>, DockError> {
    uri.path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .map_err(|_| DockError::InvalidPath("path is not valid UTF-8".to_string()))
        })
        .collect()
}

/// DELETE /api/uploader/{path} - Delete a file or directory tree.
///
/// Mounted on every uploader route that can shadow a stored path, so the
/// request URI (relative to `/api/uploader`) is the entry to delete.
#[utoipa::path(
    delete,
    path = "/api/uploader/{path}",
    tag = "uploader",
    params(
        ("path" = String, Path, description = "Path relative to the storage root")
    ),
    responses(
        (status = 200, description = "Entry deleted", body = MessageResponse),
        (status = 400, description = "Invalid path", body = ErrorBody),
        (status = 404, description = "Entry not found", body = ErrorBody)
    )
)]
pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let segments = wildcard_segments(&uri)?;
    state.files.delete(PathInput::Segments(segments)).await?;
    Ok(Json(ApiResponse::new(MessageResponse::new(
        "Deleted successfully",
    ))))
}

/// POST /api/uploader/batch-delete - Delete several entries.
///
/// Always 200; each path reports its own outcome.
#[utoipa::path(
    post,
    path = "/api/uploader/batch-delete",
    tag = "uploader",
    request_body = BatchPathsRequest,
    responses(
        (status = 200, description = "Per-path results", body = [DeleteResultResponse]),
        (status = 400, description = "Empty or malformed path list", body = ErrorBody)
    )
)]
pub async fn batch_delete(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<BatchPathsRequest>,
) -> Json<ApiResponse<Vec<DeleteResultResponse>>> {
    let outcomes = state.files.batch_delete(&req.paths).await;
    Json(ApiResponse::new(
        outcomes.into_iter().map(DeleteResultResponse::from).collect(),
    ))
}

/// GET /api/uploader/download/{path} - Download a file, or a directory as zip.
///
/// Also accepts POST. Files support range and conditional requests.
#[utoipa::path(
    get,
    path = "/api/uploader/download/{path}",
    tag = "uploader",
    params(
        ("path" = String, Path, description = "Path relative to the storage root")
    ),
    responses(
        (status = 200, description = "File contents, or a zip of the directory", content_type = "application/octet-stream"),
        (status = 400, description = "Invalid path", body = ErrorBody),
        (status = 404, description = "Entry not found", body = ErrorBody),
        (status = 500, description = "Archive could not be started", body = ErrorBody)
    )
)]
pub async fn download(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let mut segments = wildcard_segments(&uri)?;
    // Strip the route's own `download` segment.
    if !segments.is_empty() {
        segments.remove(0);
    }

    let target = state.files.resolve_download(PathInput::Segments(segments)).await?;

    if target.is_dir() {
        tracing::info!(path = %target.relative_path, "Streaming directory archive");
        return archive_response(
            ArchiveJob::Directory(target.full_path),
            &format!("{}.zip", target.name),
        )
        .await;
    }

    tracing::info!(path = %target.relative_path, size = target.stat.size, "Serving file");

    let mut request = Request::builder().method(Method::GET).uri("/");
    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(&name) {
            request = request.header(name, value);
        }
    }
    let request = request
        .body(Body::empty())
        .map_err(|e| ApiError::from(DockError::Internal(e.to_string())))?;

    let response = match ServeFile::new(&target.full_path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let mut response = response.map(Body::new);
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition_value(&target.name)?);
    }
    Ok(response)
}

/// POST /api/uploader/batch-download - Download several entries as one zip.
///
/// Fails as a whole if any path is invalid or missing.
#[utoipa::path(
    post,
    path = "/api/uploader/batch-download",
    tag = "uploader",
    request_body = BatchPathsRequest,
    responses(
        (status = 200, description = "Zip archive", content_type = "application/zip"),
        (status = 400, description = "Invalid path or empty list", body = ErrorBody),
        (status = 404, description = "An entry was not found", body = ErrorBody)
    )
)]
pub async fn batch_download(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<BatchPathsRequest>,
) -> Result<Response, ApiError> {
    let items = state.files.resolve_batch(&req.paths).await?;
    tracing::info!(count = items.len(), "Streaming batch archive");
    archive_response(
        ArchiveJob::Batch(items),
        &format!("{BATCH_ARCHIVE_NAME}.zip"),
    )
    .await
}

/// Start streaming `job` as a zip attachment.
///
/// Sources are checked before any header is sent, so a failure there is still
/// a 500. Later failures can only cut the body short.
async fn archive_response(job: ArchiveJob, filename: &str) -> Result<Response, ApiError> {
    let disposition = disposition_value(filename)?;

    let check = job.clone();
    tokio::task::spawn_blocking(move || check.preflight())
        .await
        .map_err(|e| DockError::Internal(format!("archive preflight task failed: {e}")))?
        .map_err(DockError::FileSystem)?;

    let rx = spawn_archive(job);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition_header("report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
    }

    #[test]
    fn test_content_disposition_unicode() {
        let value = content_disposition_header("日本語.zip");
        assert!(value.starts_with("attachment; filename=\"___.zip\";"));
        assert!(value.ends_with("filename*=UTF-8''%E6%97%A5%E6%9C%AC%E8%AA%9E.zip"));
    }

    #[test]
    fn test_content_disposition_header_injection() {
        let value = content_disposition_header("evil\r\nSet-Cookie: x\".txt");
        assert!(!value.contains('\r'));
        assert!(!value.contains('\n'));
        assert!(value.contains("filename=\"evilSet-Cookie: x_.txt\""));
    }

    #[test]
    fn test_disposition_value_unicode_is_valid_header() {
        let value = disposition_value("中文.txt").unwrap();
        let text = value.to_str().unwrap();
        assert!(text.contains("filename*=UTF-8''%E4%B8%AD%E6%96%87.txt"));
    }

    #[test]
    fn test_wildcard_segments() {
        let uri: Uri = "/docs/a%20b/c.txt".parse().unwrap();
        assert_eq!(
            wildcard_segments(&uri).unwrap(),
            vec!["docs", "a b", "c.txt"]
        );

        let uri: Uri = "/%2E%2E/etc".parse().unwrap();
        assert_eq!(wildcard_segments(&uri).unwrap(), vec!["..", "etc"]);
    }

    #[tokio::test]
    async fn test_archive_preflight_failure_is_internal_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let job = ArchiveJob::Directory(dir.path().join("vanished"));

        let Err(err) = archive_response(job, "vanished.zip").await else {
            panic!("archive of a missing directory should not start");
        };

        assert_eq!(err.code(), crate::web::error::ErrorCode::InternalError);
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upload_body_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = crate::storage::FileStore::initialize(dir.path(), ".tmp").unwrap();
        let state = AppState::new(FileService::new(Arc::new(store)), 10 * 1024 * 1024, 3);
        assert_eq!(state.upload_body_limit(), 31 * 1024 * 1024);
    }
}
