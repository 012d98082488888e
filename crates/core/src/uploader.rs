use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use tracing::{debug, warn};

use crate::{
    capabilities::{BlobStore, MediaMaterializer},
    error::ChunkError,
    retry::{RetryPolicy, with_retry},
    types::{Chunk, ChunkStatus, SourceAsset, StorageRef},
    workers::ChunkProgressed,
    workflow::StepReporter,
};

/// Blob path of one materialized chunk: `<asset>/chunks/0007.mp3`.
pub fn chunk_path(asset_id: &str, index: usize, extension: &str) -> String {
    format!("{asset_id}/chunks/{index:04}.{extension}")
}

/// Byte-level progress sink handed to [`BlobStore::put`].
///
/// Translates transferred bytes of the current chunk into the upload stage's
/// aggregate progress: `(completed + current / 100) / total`.
pub struct TransferProgress {
    reporter: StepReporter,
    chunk_index: usize,
    completed: usize,
    total: usize,
}

impl TransferProgress {
    pub fn new(reporter: StepReporter, chunk_index: usize, completed: usize, total: usize) -> Self {
        Self {
            reporter,
            chunk_index,
            completed,
            total: total.max(1),
        }
    }

    pub fn detached() -> Self {
        Self::new(StepReporter::detached(), 0, 0, 1)
    }

    pub fn stage_progress(&self, chunk_progress: f64) -> f64 {
        (self.completed as f64 + chunk_progress / 100.0) / self.total as f64 * 100.0
    }

    pub fn report(&self, bytes_sent: u64, bytes_total: u64) {
        let Some(tracker) = self.reporter.tracker() else {
            return;
        };

        let event = ChunkProgressed::new(
            self.reporter.workflow_id(),
            self.chunk_index,
            bytes_sent,
            bytes_total,
        );
        self.reporter.update(
            self.stage_progress(event.progress),
            format!(
                "chunk {}/{}: {:.0}%",
                self.chunk_index + 1,
                self.total,
                event.progress
            ),
        );
        tracker.bus().publish(Arc::new(event));
    }
}

/// Materializes chunk windows and writes their bytes to the blob store.
pub struct ChunkUploader {
    materializer: Arc<dyn MediaMaterializer>,
    store: Arc<dyn BlobStore>,
    retry: RetryPolicy,
}

impl ChunkUploader {
    pub fn new(
        materializer: Arc<dyn MediaMaterializer>,
        store: Arc<dyn BlobStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            materializer,
            store,
            retry,
        }
    }

    /// Uploads one chunk, retrying each external call per the policy.
    ///
    /// On success the chunk is `uploaded` and carries its storage ref. On
    /// failure it is `failed` with the error recorded. Materialized bytes are
    /// released before returning either way.
    pub async fn upload_chunk(
        &self,
        asset: &SourceAsset,
        chunk: &mut Chunk,
        progress: &TransferProgress,
    ) -> Result<StorageRef, ChunkError> {
        let window = chunk.window;
        let calls = AtomicU32::new(0);

        chunk.set_status(ChunkStatus::Materializing);
        let materialized = {
            let (materializer, window, calls) = (&*self.materializer, &window, &calls);
            with_retry(&self.retry, "materialize", move || {
                calls.fetch_add(1, Ordering::Relaxed);
                materializer.materialize(asset, window)
            })
            .await
        };
        let bytes = match materialized {
            Ok(bytes) => bytes,
            Err(e) => {
                chunk.attempts += calls.load(Ordering::Relaxed);
                warn!(chunk = window.index, error = %e, "materializing chunk failed");
                chunk.fail(&e);
                return Err(e.into());
            }
        };

        chunk.set_status(ChunkStatus::Uploading);
        let path = chunk_path(&asset.id, window.index, self.materializer.output_extension());
        let stored = {
            let (store, path, data, calls) =
                (&*self.store, path.as_str(), bytes.as_slice(), &calls);
            with_retry(&self.retry, "upload", move || {
                calls.fetch_add(1, Ordering::Relaxed);
                store.put(path, data, progress)
            })
            .await
        };
        drop(bytes);
        chunk.attempts += calls.load(Ordering::Relaxed);

        match stored {
            Ok(storage_ref) => {
                debug!(chunk = window.index, storage_ref = %storage_ref, "chunk uploaded");
                chunk.storage_ref = Some(storage_ref.clone());
                chunk.error = None;
                chunk.set_status(ChunkStatus::Uploaded);
                Ok(storage_ref)
            }
            Err(e) => {
                warn!(chunk = window.index, error = %e, "uploading chunk failed");
                chunk.fail(&e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Mutex, atomic::AtomicUsize},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        error::{MaterializeError, UploadError},
        types::ChunkWindow,
        workflow::{StepSpec, WorkflowTracker},
    };

    struct FakeMaterializer;

    #[async_trait]
    impl MediaMaterializer for FakeMaterializer {
        async fn materialize(
            &self,
            _asset: &SourceAsset,
            window: &ChunkWindow,
        ) -> Result<Vec<u8>, MaterializeError> {
            Ok(vec![window.index as u8; 10])
        }

        fn output_extension(&self) -> &str {
            "mp3"
        }
    }

    #[derive(Default)]
    struct FlakyStore {
        failures_left: AtomicUsize,
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl BlobStore for FlakyStore {
        async fn put(
            &self,
            path: &str,
            bytes: &[u8],
            progress: &TransferProgress,
        ) -> Result<StorageRef, UploadError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(UploadError::Rejected {
                    path: path.to_string(),
                    reason: "quota".into(),
                });
            }
            progress.report(bytes.len() as u64 / 2, bytes.len() as u64);
            progress.report(bytes.len() as u64, bytes.len() as u64);
            self.blobs
                .lock()
                .unwrap()
                .insert(path.to_string(), bytes.to_vec());
            Ok(StorageRef(path.to_string()))
        }

        async fn get(&self, storage_ref: &StorageRef) -> Result<Vec<u8>, UploadError> {
            self.blobs
                .lock()
                .unwrap()
                .get(storage_ref.as_str())
                .cloned()
                .ok_or_else(|| UploadError::NotFound(storage_ref.to_string()))
        }
    }

    fn uploader(store: Arc<FlakyStore>) -> ChunkUploader {
        ChunkUploader::new(
            Arc::new(FakeMaterializer),
            store,
            RetryPolicy {
                max_attempts: 2,
                call_timeout: Duration::from_secs(1),
                delay: Duration::ZERO,
            },
        )
    }

    fn asset() -> SourceAsset {
        SourceAsset::new("a1", "/media/talk.mp4", 1000, "video/mp4")
    }

    #[test]
    fn chunk_paths_are_zero_padded() {
        assert_eq!(chunk_path("a1", 7, "mp3"), "a1/chunks/0007.mp3");
        assert_eq!(chunk_path("a1", 12345, "wav"), "a1/chunks/12345.wav");
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let store = Arc::new(FlakyStore::default());
        store.failures_left.store(1, Ordering::SeqCst);
        let mut chunk = Chunk::pending(ChunkWindow::new(2, 120.0, 125.0));

        let storage_ref = uploader(Arc::clone(&store))
            .upload_chunk(&asset(), &mut chunk, &TransferProgress::detached())
            .await
            .unwrap();

        assert_eq!(storage_ref.as_str(), "a1/chunks/0002.mp3");
        assert_eq!(chunk.status, ChunkStatus::Uploaded);
        assert_eq!(chunk.storage_ref, Some(storage_ref));
        assert_eq!(chunk.attempts, 3);
    }

    #[tokio::test]
    async fn second_failure_marks_chunk_failed() {
        let store = Arc::new(FlakyStore::default());
        store.failures_left.store(2, Ordering::SeqCst);
        let mut chunk = Chunk::pending(ChunkWindow::new(1, 60.0, 120.0));

        let result = uploader(Arc::clone(&store))
            .upload_chunk(&asset(), &mut chunk, &TransferProgress::detached())
            .await;

        assert!(matches!(result, Err(ChunkError::Upload(UploadError::Rejected { .. }))));
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert!(chunk.error.as_deref().unwrap().contains("quota"));
        assert!(store.blobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn byte_progress_feeds_stage_progress() {
        let tracker = WorkflowTracker::detached();
        let wf = tracker
            .start_workflow("job", &[StepSpec::new("upload", 1.0)])
            .unwrap();
        let progress = TransferProgress::new(tracker.reporter(wf.id, 0), 1, 1, 4);

        assert_eq!(progress.stage_progress(0.0), 25.0);
        assert_eq!(progress.stage_progress(50.0), 37.5);

        progress.report(50, 100);
        let snapshot = tracker.snapshot(wf.id).unwrap();
        assert_eq!(snapshot.operations[0].progress, 37.5);
        assert_eq!(snapshot.operations[0].message, "chunk 2/4: 50%");
    }
}
