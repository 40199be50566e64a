//! Represents the caption artifact persisted for each processed image.

use serde::{Deserialize, Serialize};

/// Pairs the originating blob name with its generated caption.
///
/// Serialized as `{"blob": ..., "caption": ...}` and stored under
/// `captions/<basename>.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CaptionRecord {
    /// Full name of the blob the caption was generated for.
    pub blob: String,

    /// Caption text returned by the model, already trimmed.
    pub caption: String,
}

impl CaptionRecord {
    pub fn new(blob: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            blob: blob.into(),
            caption: caption.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
