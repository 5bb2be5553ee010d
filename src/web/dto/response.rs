//! Response DTOs for the HTTP API.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::storage::{DeleteOutcome, FileEntry};

/// Standard API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a new API response.
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// One node of the storage tree.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileInfoResponse {
    pub name: String,
    /// File extension without the dot, `folder` for directories, `unknown` otherwise.
    #[serde(rename = "type")]
    pub file_type: String,
    pub size: u64,
    /// Last modification time (RFC 3339).
    pub upload_time: String,
    pub is_dir: bool,
    /// Path relative to the storage root; pass it back to download or delete.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileInfoResponse>>,
}

impl From<FileEntry> for FileInfoResponse {
    fn from(entry: FileEntry) -> Self {
        let file_type = if entry.is_dir {
            "folder".to_string()
        } else {
            std::path::Path::new(&entry.name)
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .filter(|ext| !ext.is_empty())
                .unwrap_or_else(|| "unknown".to_string())
        };

        Self {
            name: entry.name,
            file_type,
            size: entry.size,
            upload_time: DateTime::<Utc>::from(entry.modified)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            is_dir: entry.is_dir,
            path: entry.path,
            children: entry
                .children
                .map(|children| children.into_iter().map(Self::from).collect()),
        }
    }
}

/// Result of a multipart upload.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    /// Number of files moved into place.
    pub uploaded: usize,
}

/// Per-path result of a batch delete.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResultResponse {
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DeleteOutcome> for DeleteResultResponse {
    fn from(outcome: DeleteOutcome) -> Self {
        let success = outcome.is_success();
        let error = outcome.error.map(|e| {
            if e.is_client_error() {
                e.to_string()
            } else {
                "An internal error occurred".to_string()
            }
        });
        Self {
            path: outcome.path,
            success,
            error,
        }
    }
}

/// Simple confirmation message.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
