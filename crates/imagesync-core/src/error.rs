use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

/// Failures of the sync and read paths.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Image server request failed: {0}")]
    Network(ApiError),

    #[error("Malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("No manifest stored yet - sync has not completed")]
    MissingManifest,

    #[error("Cannot infer image type from filename: {0:?}")]
    MalformedFilename(String),

    #[error("Manifest identifier {0:?} collides with a bookkeeping key")]
    ReservedIdentifier(String),
}

impl From<ApiError> for SyncError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Malformed(e) => SyncError::Parse(e),
            other => SyncError::Network(other),
        }
    }
}

impl SyncError {
    /// Whether running the sync again could succeed without changes
    /// on the server or in the stored data.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(ApiError::NotFound(_))
            | SyncError::Network(ApiError::Unauthorized)
            | SyncError::Network(ApiError::AccessDenied(_))
            | SyncError::Network(ApiError::InvalidUrl(_)) => false,
            SyncError::Network(_) | SyncError::Storage(_) => true,
            _ => false,
        }
    }
}
