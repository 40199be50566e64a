//! The caption worker's polling loop.
//!
//! Each tick lists up to `batch_size` blobs under the incoming prefix and
//! processes them one at a time:
//!
//! 1. lease the blob,
//! 2. caption it from its public URL, falling back to inline bytes,
//! 3. write `captions/<basename>.json`,
//! 4. copy the original to `processed/<basename>` and delete it under the lease,
//! 5. count it as processed.
//!
//! The lease is released whatever happens. A failing blob is counted and left
//! in place, so it is picked up again on a later tick.

use crate::{
    config::WorkerSettings,
    errors::WorkerError,
    models::{
        blob::{caption_blob_name, image_mime_type, processed_blob_name},
        caption::CaptionRecord,
        lease::Lease,
    },
    services::{
        blob_store::{BlobStore, encode_blob_name, with_lease},
        captioner::{Captioner, ImageSource},
        stats::ProcessStats,
    },
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a single tick of the loop did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was waiting under the incoming prefix.
    Idle,
    /// A batch was attempted.
    Processed { succeeded: usize, failed: usize },
    /// Listing the container failed.
    Faulted,
}

pub struct CaptionWorker {
    store: Arc<dyn BlobStore>,
    captioner: Arc<dyn Captioner>,
    stats: Arc<ProcessStats>,
    settings: WorkerSettings,
}

impl CaptionWorker {
    pub fn new(
        store: Arc<dyn BlobStore>,
        captioner: Arc<dyn Captioner>,
        stats: Arc<ProcessStats>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            captioner,
            stats,
            settings,
        }
    }

    /// Poll forever. Sleeps after an idle or faulted tick; a processed batch
    /// is followed immediately by the next tick.
    pub async fn run(self) {
        info!(
            prefix = %self.settings.incoming_prefix,
            batch_size = self.settings.batch_size,
            "caption worker started"
        );
        loop {
            match self.tick().await {
                TickOutcome::Idle => tokio::time::sleep(self.settings.idle_interval).await,
                TickOutcome::Faulted => tokio::time::sleep(self.settings.fault_interval).await,
                TickOutcome::Processed { .. } => {}
            }
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        let batch = match self
            .store
            .list_blobs(&self.settings.incoming_prefix, self.settings.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "listing incoming blobs failed");
                self.stats.record_error(&err);
                return TickOutcome::Faulted;
            }
        };

        if batch.is_empty() {
            return TickOutcome::Idle;
        }

        let mut succeeded = 0;
        let mut failed = 0;
        for name in &batch {
            match self.process_one(name).await {
                Ok(()) => succeeded += 1,
                Err(err) => {
                    warn!(blob = %name, error = %err, "processing failed; will retry");
                    self.stats.record_error(&err);
                    failed += 1;
                }
            }
        }

        TickOutcome::Processed { succeeded, failed }
    }

    /// Caption and archive one blob while holding its lease.
    pub async fn process_one(&self, name: &str) -> Result<(), WorkerError> {
        with_lease(
            self.store.as_ref(),
            name,
            self.settings.lease_duration,
            |lease| async move { self.caption_and_archive(name, &lease).await },
        )
        .await
    }

    async fn caption_and_archive(&self, name: &str, lease: &Lease) -> Result<(), WorkerError> {
        let caption = self.caption(name).await?;

        let record = CaptionRecord::new(name, caption);
        let caption_name = caption_blob_name(name);
        self.store
            .upload(
                &caption_name,
                "application/json",
                Bytes::from(record.to_json()?),
            )
            .await?;

        let archived_name = processed_blob_name(name);
        self.store
            .copy_from_url(&self.store.blob_url(name), &archived_name)
            .await?;
        self.store
            .delete(name, true, Some(lease))
            .await?;

        self.stats.record_success();
        info!(
            blob = %name,
            caption = %caption_name,
            archived = %archived_name,
            "blob captioned"
        );
        Ok(())
    }

    /// Ask for a caption by URL first, then with the blob's bytes inline.
    async fn caption(&self, name: &str) -> Result<String, WorkerError> {
        let url = format!(
            "{}/{}",
            self.settings.public_base_url,
            encode_blob_name(name)
        );
        match self.captioner.describe(&ImageSource::Url(url)).await {
            Ok(caption) => Ok(caption),
            Err(err) => {
                debug!(blob = %name, error = %err, "URL captioning failed; sending inline data");
                let data = self.store.download(name).await?;
                let image = ImageSource::inline(image_mime_type(name), data);
                Ok(self.captioner.describe(&image).await?)
            }
        }
    }
}
