//! Error types
//!
//! Every pipeline converts its internal failures into one of these kinds at
//! its own boundary; raw I/O errors never cross into the HTTP layer.

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// A malformed instruction on the control channel
///
/// Framing errors are fatal to the specific instruction, never to the whole
/// channel: the relay logs them and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Element length prefix is missing or not a decimal number
    #[error("invalid element length prefix")]
    InvalidLength,
    /// Declared element length exceeds the bytes available
    #[error("declared element length {declared} exceeds {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },
    /// Instruction ended without a `;` terminator
    #[error("missing instruction terminator")]
    MissingTerminator,
    /// Element is not valid UTF-8
    #[error("element is not valid UTF-8")]
    InvalidUtf8,
    /// Element length exceeds the configured maximum
    #[error("element length {0} exceeds maximum")]
    ElementTooLarge(usize),
    /// Instruction grew past the configured maximum without terminating
    #[error("instruction length {0} exceeds maximum")]
    InstructionTooLarge(usize),
    /// Instruction has no elements at all
    #[error("empty instruction")]
    Empty,
    /// Bytes left over after the terminator of a single-instruction decode
    #[error("trailing data after instruction terminator")]
    TrailingData,
}

/// Failure of an upload or download pipeline
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// HTTP request referenced a session that is not registered
    #[error("no connection for session {0}")]
    ConnectionNotFound(String),
    /// A transfer stream already exists for this (session, stream index)
    #[error("stream {stream_index} already active on session {session_id}")]
    StreamConflict {
        session_id: String,
        stream_index: String,
    },
    /// Control channel or HTTP connection dropped mid-flight
    #[error("transfer aborted: {0}")]
    Aborted(String),
    /// Malformed instruction payload
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// A `blob` payload that did not decode as base64
    #[error("invalid base64 payload: {0}")]
    Payload(String),
    /// The source of upload bytes failed (request body died)
    #[error("upload source failed: {0}")]
    Source(String),
}

/// Failure of a recording capture/upload job
#[derive(Debug, Error)]
pub enum RecordingError {
    /// Artifact never appeared within the grace period
    #[error("recording artifact never appeared at {0}")]
    CaptureTimeout(std::path::PathBuf),
    /// Compression failed; the raw artifact is retained
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),
    /// Object-storage upload failed; local files are retained
    #[error(transparent)]
    Upload(#[from] StorageError),
    /// Reading artifact metadata failed
    #[error("artifact inspection failed: {0}")]
    Inspect(#[source] std::io::Error),
}

/// Failure of an object-storage call
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object storage request failed: {0}")]
    Request(String),
    #[error("object storage rejected {key}: status {status}")]
    Rejected { key: String, status: u16 },
}

/// Top-level error for the server binary
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error("invalid connection token: {0}")]
    Token(String),
    #[error("daemon handshake failed: {0}")]
    Handshake(String),
}
