use crate::services::{blob_store::StorageError, captioner::CaptionError};
use thiserror::Error;

/// Failure while processing a single blob.
///
/// Counted by the polling loop; the blob stays under the incoming prefix and
/// is retried on a later tick.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Caption(#[from] CaptionError),
    #[error("failed to encode caption record: {0}")]
    Encode(#[from] serde_json::Error),
}
