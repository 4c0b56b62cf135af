//! Download pipeline
//!
//! `begin` registers the pending response and tells the daemon to start
//! sending; the control-channel relay then feeds intercepted `blob`
//! instructions through [`on_blob`] until [`on_end`] or [`abort`].
//!
//! Bytes are written to the sink strictly in the order their `blob`
//! instructions arrive — the response stream is itself ordered, so no
//! reordering or cross-chunk buffering is permitted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransferError;
use crate::protocol::{Instruction, STATUS_SUCCESS};
use crate::registry::{ConnectionRegistry, Session, TransferStatus, TransferStream};

/// A download registered and acknowledged, awaiting daemon blobs
#[derive(Debug)]
pub struct PendingDownload {
    /// Session the stream belongs to
    pub session_id: String,
    /// Stream index the daemon will send blobs on
    pub stream_index: String,
    /// Filename for the Content-Disposition header
    pub filename: String,
    rx: mpsc::Receiver<Result<Bytes, TransferError>>,
}

/// How a pending download began
#[derive(Debug)]
pub enum DownloadStart {
    /// First chunk arrived; stream the rest from the receiver
    Data(Bytes, mpsc::Receiver<Result<Bytes, TransferError>>),
    /// Stream ended cleanly before any data: an empty file
    Empty,
    /// Stream failed before any byte was written; a structured error
    /// body is still possible
    Failed(TransferError),
}

impl PendingDownload {
    /// Await the first event on the stream
    ///
    /// Distinguishes data, clean-empty and failed-before-first-byte so the
    /// HTTP layer can still send a structured error while headers are
    /// uncommitted. After the first byte, failures surface through the body
    /// stream and abort the response instead.
    pub async fn first_event(mut self) -> DownloadStart {
        match self.rx.recv().await {
            Some(Ok(bytes)) => DownloadStart::Data(bytes, self.rx),
            Some(Err(e)) => DownloadStart::Failed(e),
            None => DownloadStart::Empty,
        }
    }
}

/// Begin a download for (session, stream index)
///
/// Registers the transfer stream with the response sink, then emits
/// `ack(stream_index, 0, SUCCESS)` telling the daemon it may start sending
/// `blob` instructions. The ack is on the wire before any byte reaches the
/// response.
pub async fn begin(
    registry: &ConnectionRegistry,
    session_id: &str,
    stream_index: &str,
    filename: &str,
    queue_depth: usize,
) -> Result<PendingDownload, TransferError> {
    let session = registry
        .get(session_id)
        .await
        .ok_or_else(|| TransferError::ConnectionNotFound(session_id.to_owned()))?;

    let (sink, rx) = mpsc::channel(queue_depth.max(1));
    session.register_stream(stream_index, TransferStream::download(filename, sink))?;

    if let Err(e) = session
        .send(Instruction::ack(stream_index, STATUS_SUCCESS, "SUCCESS"))
        .await
    {
        session.finish_stream(stream_index, TransferStatus::Failed);
        return Err(e);
    }

    tracing::debug!(
        session_id = %session_id,
        stream_index = %stream_index,
        filename = %filename,
        "Download stream acknowledged"
    );

    Ok(PendingDownload {
        session_id: session_id.to_owned(),
        stream_index: stream_index.to_owned(),
        filename: filename.to_owned(),
        rx,
    })
}

/// Feed one intercepted `blob` payload to its pending response
///
/// Returns `Ok(false)` when no download stream is registered for the index;
/// the caller relays the instruction verbatim instead. A payload that does
/// not decode is fatal to this instruction only — the stream stays open.
pub async fn on_blob(
    session: &Session,
    stream_index: &str,
    payload: &str,
) -> Result<bool, TransferError> {
    let Some(sink) = session.stream_sink(stream_index) else {
        return Ok(false);
    };

    let decoded = BASE64
        .decode(payload)
        .map_err(|e| TransferError::Payload(e.to_string()))?;
    let len = decoded.len() as u64;

    // Awaited in the relay task: arrival order is preserved and a slow
    // response consumer backpressures the channel read loop.
    if sink.send(Ok(Bytes::from(decoded))).await.is_err() {
        session.finish_stream(stream_index, TransferStatus::Failed);
        return Err(TransferError::Aborted(
            "response sink closed by client".into(),
        ));
    }

    session.add_stream_bytes(stream_index, len);
    Ok(true)
}

/// Finalize a stream on `end`
///
/// Dropping the sink closes the response body cleanly. Returns whether a
/// stream was intercepted for this index.
pub fn on_end(session: &Session, stream_index: &str) -> bool {
    match session.finish_stream(stream_index, TransferStatus::Completed) {
        Some(stream) => {
            tracing::info!(
                session_id = %session.id,
                stream_index = %stream_index,
                filename = %stream.filename,
                bytes = stream.bytes_transferred,
                "Download complete"
            );
            true
        }
        None => false,
    }
}

/// Abort a stream, pushing the error into the pending response
pub async fn abort(session: &Session, stream_index: &str, err: TransferError) -> bool {
    let sink = session.stream_sink(stream_index);
    match session.finish_stream(stream_index, TransferStatus::Failed) {
        Some(stream) => {
            tracing::warn!(
                session_id = %session.id,
                stream_index = %stream_index,
                filename = %stream.filename,
                bytes = stream.bytes_transferred,
                error = %err,
                "Download aborted"
            );
            if let Some(sink) = sink {
                let _ = sink.send(Err(err)).await;
            }
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::{ConnectionSettings, ProtocolFamily};

    async fn setup() -> (
        Arc<ConnectionRegistry>,
        Arc<Session>,
        mpsc::Receiver<Instruction>,
    ) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::channel(8);
        let settings = ConnectionSettings {
            protocol: ProtocolFamily::Vnc,
            params: Default::default(),
            recording: None,
        };
        let session = Arc::new(Session::new("s-1", settings, tx));
        registry.register(Arc::clone(&session)).await.unwrap();
        (registry, session, rx)
    }

    #[tokio::test]
    async fn test_ack_emitted_before_any_bytes() {
        let (registry, _session, mut outbound) = setup().await;

        let pending = begin(&registry, "s-1", "42", "file.txt", 8).await.unwrap();

        // The ack is already queued although no blob has arrived
        let ack = outbound.recv().await.unwrap();
        assert_eq!(ack.opcode, "ack");
        assert_eq!(ack.arg(0), Some("42"));
        assert_eq!(ack.arg(1), Some("0"));
        assert_eq!(pending.stream_index, "42");
    }

    #[tokio::test]
    async fn test_blobs_arrive_in_order() {
        let (registry, session, _outbound) = setup().await;
        let pending = begin(&registry, "s-1", "1", "f", 8).await.unwrap();

        assert!(on_blob(&session, "1", &BASE64.encode(b"first ")).await.unwrap());
        assert!(on_blob(&session, "1", &BASE64.encode(b"second")).await.unwrap());
        assert!(on_end(&session, "1"));

        let mut collected = Vec::new();
        match pending.first_event().await {
            DownloadStart::Data(first, mut rx) => {
                collected.extend_from_slice(&first);
                while let Some(item) = rx.recv().await {
                    collected.extend_from_slice(&item.unwrap());
                }
            }
            other => panic!("expected data, got {other:?}"),
        }
        assert_eq!(collected, b"first second");
        assert!(!session.has_stream("1"));
    }

    #[tokio::test]
    async fn test_unregistered_index_is_not_intercepted() {
        let (_registry, session, _outbound) = setup().await;
        assert!(!on_blob(&session, "99", "aGk=").await.unwrap());
        assert!(!on_end(&session, "99"));
    }

    #[tokio::test]
    async fn test_error_before_first_byte() {
        let (registry, session, _outbound) = setup().await;
        let pending = begin(&registry, "s-1", "2", "f", 8).await.unwrap();

        abort(
            &session,
            "2",
            TransferError::Aborted("daemon went away".into()),
        )
        .await;

        match pending.first_event().await {
            DownloadStart::Failed(TransferError::Aborted(_)) => {}
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!session.has_stream("2"));
    }

    #[tokio::test]
    async fn test_clean_end_without_data_is_empty() {
        let (registry, session, _outbound) = setup().await;
        let pending = begin(&registry, "s-1", "3", "empty.txt", 8).await.unwrap();

        on_end(&session, "3");

        assert!(matches!(pending.first_event().await, DownloadStart::Empty));
    }

    #[tokio::test]
    async fn test_bad_payload_keeps_stream_open() {
        let (registry, session, _outbound) = setup().await;
        let _pending = begin(&registry, "s-1", "4", "f", 8).await.unwrap();

        let err = on_blob(&session, "4", "!!!not-base64!!!").await.unwrap_err();
        assert!(matches!(err, TransferError::Payload(_)));
        assert!(session.has_stream("4"));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let registry = ConnectionRegistry::new();
        let err = begin(&registry, "ghost", "1", "f", 8).await.unwrap_err();
        assert!(matches!(err, TransferError::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_download_conflicts() {
        let (registry, _session, _outbound) = setup().await;
        let _first = begin(&registry, "s-1", "7", "f", 8).await.unwrap();
        let err = begin(&registry, "s-1", "7", "f", 8).await.unwrap_err();
        assert!(matches!(err, TransferError::StreamConflict { .. }));
    }
}
