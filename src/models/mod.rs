//! Core data models for the caption worker.
//!
//! These are the values that cross module boundaries: the persisted caption
//! record, the lease handle returned by a blob store, and the statistics
//! snapshot served over HTTP.

pub mod blob;
pub mod caption;
pub mod lease;
pub mod stats;
