//! Top-level error type composing each module's own error enum into one
//! type the binaries can propagate from `main`.

use crate::ingest::IngestError;
use crate::json::JsonError;
use crate::north::NorthError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Json(#[from] JsonError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    North(#[from] NorthError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
