//! Upload pipeline
//!
//! Reads the source in fixed-size chunks, base64-encodes each chunk into a
//! `blob` instruction, and terminates the stream with `end`. No per-chunk
//! acknowledgement is awaited: the control channel is a reliable ordered
//! byte stream, so instruction order is preserved by construction.
//!
//! Emission awaits the session's bounded outbound queue and yields between
//! chunks, so a single very large file cannot starve other sessions while
//! the channel drains.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::TransferError;
use crate::protocol::Instruction;
use crate::registry::{ConnectionRegistry, Session, TransferStatus, TransferStream};

/// Result of a completed upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    /// Raw (pre-encoding) bytes pushed to the daemon
    pub bytes_sent: u64,
    /// Number of `blob` instructions emitted
    pub chunk_count: u64,
}

/// Push an HTTP request body to the daemon as a file stream
///
/// Registers a transfer stream for (session, stream index) for the duration
/// of the call; the slot is released on completion and on every failure
/// path. Fails with `ConnectionNotFound`, `StreamConflict`, `Aborted` (the
/// control channel closed mid-transfer) or `Source` (the request body died).
pub async fn upload<S>(
    registry: &ConnectionRegistry,
    session_id: &str,
    stream_index: &str,
    filename: &str,
    chunk_size: usize,
    source: S,
) -> Result<UploadReport, TransferError>
where
    S: Stream<Item = Result<Bytes, TransferError>> + Unpin,
{
    let session = registry
        .get(session_id)
        .await
        .ok_or_else(|| TransferError::ConnectionNotFound(session_id.to_owned()))?;

    session.register_stream(stream_index, TransferStream::upload(filename))?;

    let result = pump(&session, stream_index, chunk_size, source).await;

    let status = if result.is_ok() {
        TransferStatus::Completed
    } else {
        TransferStatus::Failed
    };
    session.finish_stream(stream_index, status);

    match &result {
        Ok(report) => tracing::info!(
            session_id = %session_id,
            stream_index = %stream_index,
            filename = %filename,
            bytes = report.bytes_sent,
            chunks = report.chunk_count,
            "Upload complete"
        ),
        Err(e) => tracing::warn!(
            session_id = %session_id,
            stream_index = %stream_index,
            filename = %filename,
            error = %e,
            "Upload failed"
        ),
    }

    result
}

async fn pump<S>(
    session: &Session,
    stream_index: &str,
    chunk_size: usize,
    mut source: S,
) -> Result<UploadReport, TransferError>
where
    S: Stream<Item = Result<Bytes, TransferError>> + Unpin,
{
    debug_assert!(chunk_size > 0);

    let mut pending = BytesMut::new();
    let mut report = UploadReport {
        bytes_sent: 0,
        chunk_count: 0,
    };

    while let Some(piece) = source.next().await {
        let piece = piece?;
        pending.put(piece);

        // Source chunk boundaries are arbitrary; emit only full-size chunks
        // here and let the tail flush after the source ends.
        while pending.len() >= chunk_size {
            let chunk = pending.split_to(chunk_size).freeze();
            emit_blob(session, stream_index, chunk, &mut report).await?;
        }
    }

    if !pending.is_empty() {
        let chunk = pending.split().freeze();
        emit_blob(session, stream_index, chunk, &mut report).await?;
    }

    session.send(Instruction::end(stream_index)).await?;
    Ok(report)
}

async fn emit_blob(
    session: &Session,
    stream_index: &str,
    chunk: Bytes,
    report: &mut UploadReport,
) -> Result<(), TransferError> {
    let len = chunk.len() as u64;
    let encoded = BASE64.encode(&chunk);

    session.send(Instruction::blob(stream_index, encoded)).await?;
    session.add_stream_bytes(stream_index, len);
    report.bytes_sent += len;
    report.chunk_count += 1;

    // Let other transfers interleave between chunks
    tokio::task::yield_now().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::{ConnectionSettings, ProtocolFamily, Session};

    const MIB: usize = 1024 * 1024;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            protocol: ProtocolFamily::Rdp,
            params: Default::default(),
            recording: None,
        }
    }

    /// Registry with one session; returns a task draining the outbound
    /// queue into a Vec so bounded sends never deadlock the test.
    async fn registry_with_session(
        id: &str,
    ) -> (
        Arc<ConnectionRegistry>,
        tokio::task::JoinHandle<Vec<Instruction>>,
    ) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        registry
            .register(Arc::new(Session::new(id, settings(), tx)))
            .await
            .unwrap();

        let drain = tokio::spawn(async move {
            let mut all = Vec::new();
            while let Some(instruction) = rx.recv().await {
                all.push(instruction);
            }
            all
        });
        (registry, drain)
    }

    fn body(pieces: Vec<Vec<u8>>) -> impl Stream<Item = Result<Bytes, TransferError>> + Unpin {
        stream::iter(pieces.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    #[tokio::test]
    async fn test_ten_mib_in_four_mib_chunks() {
        let (registry, drain) = registry_with_session("s-1").await;

        let payload = vec![0xA5u8; 10 * MIB];
        let report = upload(
            &registry,
            "s-1",
            "7",
            "big.bin",
            4 * MIB,
            body(vec![payload.clone()]),
        )
        .await
        .unwrap();

        assert_eq!(report.bytes_sent, (10 * MIB) as u64);
        assert_eq!(report.chunk_count, 3);

        // Close the channel so the drain task finishes
        registry.remove("s-1").await;
        let sent = drain.await.unwrap();

        assert_eq!(sent.len(), 4);
        let sizes: Vec<usize> = sent[..3]
            .iter()
            .map(|i| {
                assert_eq!(i.opcode, "blob");
                assert_eq!(i.arg(0), Some("7"));
                BASE64.decode(i.arg(1).unwrap()).unwrap().len()
            })
            .collect();
        assert_eq!(sizes, vec![4 * MIB, 4 * MIB, 2 * MIB]);
        assert_eq!(sent[3].opcode, "end");
        assert_eq!(sent[3].arg(0), Some("7"));
    }

    #[tokio::test]
    async fn test_reassembly_is_exact_regardless_of_source_boundaries() {
        let (registry, drain) = registry_with_session("s-1").await;

        // Ragged source pieces, chunk ceiling that divides none of them
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let pieces: Vec<Vec<u8>> = payload.chunks(7001).map(|c| c.to_vec()).collect();

        let report = upload(&registry, "s-1", "3", "data.bin", 16 * 1024, body(pieces))
            .await
            .unwrap();
        assert_eq!(report.bytes_sent, payload.len() as u64);

        registry.remove("s-1").await;
        let sent = drain.await.unwrap();

        let mut reassembled = Vec::new();
        for instruction in &sent {
            if instruction.opcode == "blob" {
                reassembled.extend(BASE64.decode(instruction.arg(1).unwrap()).unwrap());
            }
        }
        assert_eq!(reassembled, payload);
        assert_eq!(sent.last().unwrap().opcode, "end");
    }

    #[tokio::test]
    async fn test_empty_body_sends_end_only() {
        let (registry, drain) = registry_with_session("s-1").await;

        let report = upload(&registry, "s-1", "1", "empty", 4 * MIB, body(vec![]))
            .await
            .unwrap();
        assert_eq!(report.bytes_sent, 0);
        assert_eq!(report.chunk_count, 0);

        registry.remove("s-1").await;
        let sent = drain.await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, "end");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let registry = ConnectionRegistry::new();
        let err = upload(&registry, "ghost", "1", "f", 1024, body(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_stream_conflict_then_reuse() {
        let (registry, _drain) = registry_with_session("s-1").await;
        let session = registry.get("s-1").await.unwrap();
        session
            .register_stream("5", TransferStream::upload("other"))
            .unwrap();

        let err = upload(&registry, "s-1", "5", "f", 1024, body(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::StreamConflict { .. }));

        // After the first stream terminates the key is reusable
        session.finish_stream("5", TransferStatus::Completed);
        upload(&registry, "s-1", "5", "f", 1024, body(vec![]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_channel_close_mid_transfer_aborts() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::channel(4);
        registry
            .register(Arc::new(Session::new("s-1", settings(), tx)))
            .await
            .unwrap();
        // Writer task is gone: sends fail once the buffer is unreachable
        drop(rx);

        let err = upload(
            &registry,
            "s-1",
            "2",
            "f",
            1024,
            body(vec![vec![1u8; 4096]]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Aborted(_)));

        // The failed transfer released its stream slot
        let session = registry.get("s-1").await.unwrap();
        assert!(!session.has_stream("2"));
    }

    #[tokio::test]
    async fn test_source_failure_releases_slot() {
        let (registry, _drain) = registry_with_session("s-1").await;

        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(TransferError::Source("body reset".into())),
        ]);
        let err = upload(&registry, "s-1", "8", "f", 1024, source)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Source(_)));

        let session = registry.get("s-1").await.unwrap();
        assert!(!session.has_stream("8"));
    }
}
