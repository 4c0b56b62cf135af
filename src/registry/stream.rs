//! Per-stream transfer state
//!
//! One `TransferStream` exists per in-flight file transfer, keyed by stream
//! index within its session. Downloads hold the sink half of the channel
//! feeding the pending HTTP response body.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransferError;

/// Sink carrying decoded download bytes toward an HTTP response
///
/// A clean end of stream is signalled by dropping the sender; an abort is an
/// explicit `Err` item so the response body can terminate abruptly.
pub type ByteSink = mpsc::Sender<Result<Bytes, TransferError>>;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Browser body pushed to the daemon
    Upload,
    /// Daemon blobs relayed to a pending HTTP response
    Download,
}

/// Lifecycle of a transfer stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Registered, no bytes moved yet
    Queued,
    /// Bytes are flowing
    Active,
    /// Finished cleanly
    Completed,
    /// Aborted or errored
    Failed,
}

impl TransferStatus {
    /// Whether the stream has reached a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

/// One in-flight file transfer
#[derive(Debug)]
pub struct TransferStream {
    /// Direction of the transfer
    pub direction: Direction,
    /// Filename declared by the initiating side
    pub filename: String,
    /// Sum of chunk lengths moved so far
    pub bytes_transferred: u64,
    /// Current status
    pub status: TransferStatus,
    /// Response sink (downloads only)
    sink: Option<ByteSink>,
}

impl TransferStream {
    /// New upload stream
    pub fn upload(filename: impl Into<String>) -> Self {
        Self {
            direction: Direction::Upload,
            filename: filename.into(),
            bytes_transferred: 0,
            status: TransferStatus::Queued,
            sink: None,
        }
    }

    /// New download stream bound to a response sink
    pub fn download(filename: impl Into<String>, sink: ByteSink) -> Self {
        Self {
            direction: Direction::Download,
            filename: filename.into(),
            bytes_transferred: 0,
            status: TransferStatus::Queued,
            sink: Some(sink),
        }
    }

    /// Clone the response sink, marking the stream active
    pub fn sink(&mut self) -> Option<ByteSink> {
        if self.status == TransferStatus::Queued {
            self.status = TransferStatus::Active;
        }
        self.sink.clone()
    }

    /// Account for `n` transferred bytes
    pub fn add_bytes(&mut self, n: u64) {
        self.bytes_transferred += n;
        if self.status == TransferStatus::Queued {
            self.status = TransferStatus::Active;
        }
    }

    /// Move to a terminal state, dropping the sink
    ///
    /// Dropping the sink is what ends a download response body; callers that
    /// need to push a final error must clone the sink first.
    pub fn finish(&mut self, status: TransferStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.sink = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_stream_lifecycle() {
        let mut stream = TransferStream::upload("report.pdf");
        assert_eq!(stream.direction, Direction::Upload);
        assert_eq!(stream.status, TransferStatus::Queued);

        stream.add_bytes(1024);
        assert_eq!(stream.status, TransferStatus::Active);
        assert_eq!(stream.bytes_transferred, 1024);

        stream.finish(TransferStatus::Completed);
        assert!(stream.status.is_terminal());
    }

    #[test]
    fn test_download_stream_holds_sink() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let mut stream = TransferStream::download("log.txt", tx);

        assert!(stream.sink().is_some());
        assert_eq!(stream.status, TransferStatus::Active);

        stream.finish(TransferStatus::Failed);
        assert!(stream.sink().is_none());
    }
}
