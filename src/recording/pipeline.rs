//! Recording capture/upload orchestration
//!
//! Driven by session lifecycle, not HTTP: when a recording-enabled session
//! closes, a job is spawned that waits out the daemon's final flush,
//! compresses the artifact, uploads it and cleans up. Every failure path
//! terminates the job; nothing here can block or crash session teardown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::compress::gzip_file;
use super::job::{JobState, RecordingJob};
use super::storage::BlobStore;
use crate::error::RecordingError;
use crate::registry::Session;

/// Content-Encoding header value for gzip artifacts
const CONTENT_ENCODING_GZIP: &str = "gzip";

/// Executes recording jobs against a blob store
pub struct RecordingPipeline {
    root: PathBuf,
    grace: Duration,
    key_prefix: String,
    store: Arc<dyn BlobStore>,
}

impl RecordingPipeline {
    /// Create a pipeline writing under `root` with the given grace period
    pub fn new(
        root: impl Into<PathBuf>,
        grace: Duration,
        key_prefix: impl Into<String>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            root: root.into(),
            grace,
            key_prefix: key_prefix.into(),
            store,
        }
    }

    /// Spawn a job for a closed session, if its settings enabled recording
    pub fn spawn(self: &Arc<Self>, session: &Session) -> Option<JoinHandle<RecordingJob>> {
        let target = session.settings.recording.as_ref()?;
        let job = RecordingJob::new(
            session.id.clone(),
            session.settings.username(),
            session.settings.protocol,
            &self.root,
            target,
        );

        let pipeline = Arc::clone(self);
        Some(tokio::spawn(async move { pipeline.run(job).await }))
    }

    /// Drive one job to a terminal state
    ///
    /// Always returns the job; failures are logged and recorded on it.
    pub async fn run(&self, mut job: RecordingJob) -> RecordingJob {
        // The daemon may still be flushing when session close fires
        tokio::time::sleep(self.grace).await;

        match self.execute(&mut job).await {
            Ok(()) => {
                tracing::info!(
                    session_id = %job.session_id,
                    bytes = job.size_bytes.unwrap_or(0),
                    "Recording archived"
                );
            }
            Err(e) => {
                job.fail();
                tracing::warn!(
                    session_id = %job.session_id,
                    state = ?job.state,
                    error = %e,
                    "Recording job failed"
                );
            }
        }
        job
    }

    async fn execute(&self, job: &mut RecordingJob) -> Result<(), RecordingError> {
        let metadata = tokio::fs::metadata(&job.raw_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecordingError::CaptureTimeout(job.raw_path.clone())
            } else {
                RecordingError::Inspect(e)
            }
        })?;
        job.size_bytes = Some(metadata.len());

        // Compress into the sibling file; the raw artifact stays put so a
        // failure here loses nothing.
        job.start_compressing();
        let (raw, compressed) = (job.raw_path.clone(), job.compressed_path.clone());
        tokio::task::spawn_blocking(move || gzip_file(&raw, &compressed))
            .await
            .map_err(|e| RecordingError::Compress(std::io::Error::other(e)))?
            .map_err(RecordingError::Compress)?;

        job.start_uploading();
        let key = job.object_key(&self.key_prefix, Utc::now());
        self.store
            .put(&key, &job.compressed_path, CONTENT_ENCODING_GZIP)
            .await?;
        job.complete();

        // The artifact is durably stored; a local cleanup miss is non-fatal
        // and must not trigger a re-upload.
        for path in [&job.raw_path, &job.compressed_path] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(
                    session_id = %job.session_id,
                    path = %path.display(),
                    error = %e,
                    "Could not remove local recording file"
                );
            }
        }

        debug_assert_eq!(job.state, JobState::Done);
        Ok(())
    }
}
