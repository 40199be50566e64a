pub mod blob_store;
pub mod captioner;
pub mod sampler;
pub mod stats;
pub mod worker;
