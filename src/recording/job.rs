//! Recording job state machine

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::registry::{ProtocolFamily, RecordingTarget};

/// Lifecycle of a capture/upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Session closed, artifact not yet checked
    Pending,
    /// Streaming the raw artifact through the compressor
    Compressing,
    /// Pushing the compressed artifact to object storage
    Uploading,
    /// Uploaded; local copies removed (best effort)
    Done,
    /// Gave up at some step; never retried
    Failed,
}

/// One capture/upload task, keyed by session identifier
#[derive(Debug)]
pub struct RecordingJob {
    /// Owning session
    pub session_id: String,
    /// Username the session connected as, for the object key
    pub username: String,
    /// Where the daemon wrote the raw artifact
    pub raw_path: PathBuf,
    /// Sibling path the compressor writes to
    pub compressed_path: PathBuf,
    /// Native-format extension used in the object key
    pub extension: &'static str,
    /// Raw artifact size, once known
    pub size_bytes: Option<u64>,
    /// Current state
    pub state: JobState,
}

impl RecordingJob {
    /// Build a job for a closed session with recording enabled
    ///
    /// The daemon writes into `{root}/{session_id}/{target.name}`; the
    /// compressed sibling gets a `.gz` suffix.
    pub fn new(
        session_id: impl Into<String>,
        username: impl Into<String>,
        protocol: ProtocolFamily,
        root: &Path,
        target: &RecordingTarget,
    ) -> Self {
        let session_id = session_id.into();
        let raw_path = root.join(&session_id).join(&target.name);
        let compressed_path = raw_path.with_file_name(format!("{}.gz", target.name));
        let extension = if protocol.is_terminal() {
            "typescript"
        } else {
            "guac"
        };

        Self {
            session_id,
            username: username.into(),
            raw_path,
            compressed_path,
            extension,
            size_bytes: None,
            state: JobState::Pending,
        }
    }

    /// Deterministic object-storage key for this job
    ///
    /// `{prefix}{username}_{session_id}_{timestamp}.{ext}.gz`, with the
    /// ISO-8601 timestamp's colons and periods normalized to hyphens so the
    /// key is safe for any blob store.
    pub fn object_key(&self, prefix: &str, at: DateTime<Utc>) -> String {
        let timestamp = at
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .replace([':', '.'], "-");
        format!(
            "{prefix}{}_{}_{timestamp}.{}.gz",
            self.username, self.session_id, self.extension
        )
    }

    /// Advance to `Compressing` (only from `Pending`)
    pub fn start_compressing(&mut self) {
        debug_assert_eq!(self.state, JobState::Pending);
        self.state = JobState::Compressing;
    }

    /// Advance to `Uploading` (only from `Compressing`)
    pub fn start_uploading(&mut self) {
        debug_assert_eq!(self.state, JobState::Compressing);
        self.state = JobState::Uploading;
    }

    /// Terminal success
    pub fn complete(&mut self) {
        debug_assert_eq!(self.state, JobState::Uploading);
        self.state = JobState::Done;
    }

    /// Terminal failure, from any step
    pub fn fail(&mut self) {
        self.state = JobState::Failed;
    }

    /// Whether the job reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Done | JobState::Failed)
    }
}
