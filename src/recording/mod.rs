//! Session recording capture and offload
//!
//! The daemon writes its native recording format to a local path while a
//! session runs. When the session closes, a `RecordingJob` waits out a short
//! grace period for the daemon's final flush, compresses the artifact,
//! uploads it to object storage and deletes the local copies.
//!
//! Jobs run sequentially through `Pending → Compressing → Uploading → Done`
//! (or `Failed` at any step) and are never retried: a lost recording is
//! logged, not allowed to block or crash connection teardown.

pub mod compress;
pub mod job;
pub mod pipeline;
pub mod storage;

pub use job::{JobState, RecordingJob};
pub use pipeline::RecordingPipeline;
pub use storage::{BlobStore, HttpObjectStorage, MemoryBlobStore, ObjectStorageConfig};
