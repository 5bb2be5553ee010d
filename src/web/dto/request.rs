//! Request DTOs for the HTTP API.

use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

/// Body of the batch delete and batch download endpoints.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BatchPathsRequest {
    /// Paths relative to the storage root.
    #[validate(length(min = 1, message = "At least one path is required"))]
    pub paths: Vec<String>,
}
