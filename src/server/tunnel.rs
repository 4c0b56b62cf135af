//! Control-channel tunnel
//!
//! One WebSocket connection from the browser becomes one TCP control
//! channel to the daemon. After the connect handshake, instructions are
//! relayed verbatim in both directions; the single exception is `blob` and
//! `end` instructions addressed to a registered download stream, which are
//! intercepted into the download pipeline instead of reaching the browser.
//!
//! When either side closes, the session is removed from the registry
//! (force-finalizing open transfers) and, if recording was enabled, handed
//! to the recording pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::ApiError;
use super::http::AppState;
use crate::error::GatewayError;
use crate::protocol::{
    Instruction, InstructionReader, OP_ARGS, OP_AUDIO, OP_BLOB, OP_CONNECT, OP_END, OP_IMAGE,
    OP_READY, OP_SELECT, OP_SIZE, OP_VIDEO,
};
use crate::registry::{ConnectionSettings, Session};
use crate::transfer::download;

/// `GET /ws?token=…` — open a control channel
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = query.get("token").cloned() else {
        return ApiError::BadRequest("missing connection token".into()).into_response();
    };
    let settings = match ConnectionSettings::from_token(&token) {
        Ok(settings) => settings,
        Err(e) => return ApiError::BadRequest(e.to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        if let Err(e) = run_session(state, settings, socket).await {
            tracing::warn!(error = %e, "Session ended with error");
        }
    })
}

async fn run_session(
    state: AppState,
    settings: ConnectionSettings,
    socket: WebSocket,
) -> Result<(), GatewayError> {
    let daemon = TcpStream::connect(state.config.daemon_addr).await?;
    daemon.set_nodelay(true)?;
    let (daemon_rd, daemon_wr) = daemon.into_split();
    let mut reader = DaemonReader::new(daemon_rd);
    let mut writer = DaemonWriter::new(daemon_wr);

    let daemon_id = handshake(&mut reader, &mut writer, &settings).await?;

    let session_id = Uuid::new_v4().to_string();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_queue);
    let session = Arc::new(Session::new(session_id.clone(), settings, outbound_tx));
    session.set_daemon_id(daemon_id.clone());
    state
        .registry
        .register(Arc::clone(&session))
        .await
        .map_err(|e| GatewayError::Handshake(e.to_string()))?;

    tracing::info!(
        session_id = %session_id,
        daemon_id = %daemon_id,
        protocol = session.settings.protocol.as_str(),
        "Control channel established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Tell the front-end which tunnel id to use for file endpoints
    let ready = Instruction::new(OP_READY, vec![session_id.clone()]);
    if ws_tx.send(Message::Text(ready.encode_str())).await.is_ok() {
        tokio::select! {
            result = daemon_to_browser(&mut reader, &mut ws_tx, &session) => {
                if let Err(e) = result {
                    tracing::debug!(session_id = %session_id, error = %e, "Daemon side closed");
                }
            }
            _ = browser_to_daemon(&mut ws_rx, &session) => {}
            _ = drain_outbound(outbound_rx, &mut writer) => {}
        }
    }

    if let Some(session) = state.registry.remove(&session_id).await {
        if session.settings.recording.is_some() {
            match &state.recorder {
                Some(recorder) => {
                    recorder.spawn(&session);
                }
                None => tracing::warn!(
                    session_id = %session_id,
                    "Recording enabled but no object storage configured"
                ),
            }
        }
    }
    Ok(())
}

/// Relay daemon instructions to the browser, intercepting download traffic
async fn daemon_to_browser<R>(
    reader: &mut DaemonReader<R>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    session: &Session,
) -> Result<(), GatewayError>
where
    R: AsyncRead + Unpin,
{
    while let Some(instruction) = reader.next().await? {
        if let Some(forward) = intercept(session, instruction).await {
            if ws_tx.send(Message::Text(forward.encode_str())).await.is_err() {
                break;
            }
        }
    }
    Ok(())
}

/// Route one daemon instruction: `None` when consumed by a download stream
async fn intercept(session: &Session, instruction: Instruction) -> Option<Instruction> {
    match instruction.opcode.as_str() {
        OP_BLOB => {
            let stream_index = instruction.arg(0).unwrap_or_default().to_owned();
            let payload = instruction.arg(1).unwrap_or_default();
            match download::on_blob(session, &stream_index, payload).await {
                Ok(true) => None,
                Ok(false) => Some(instruction),
                Err(e) => {
                    // Fatal to this instruction only; the channel lives on
                    tracing::warn!(
                        session_id = %session.id,
                        stream_index = %stream_index,
                        error = %e,
                        "Dropped blob instruction"
                    );
                    None
                }
            }
        }
        OP_END => {
            let stream_index = instruction.arg(0).unwrap_or_default();
            if download::on_end(session, stream_index) {
                None
            } else {
                Some(instruction)
            }
        }
        _ => Some(instruction),
    }
}

/// Relay browser frames to the daemon through the session's outbound queue
///
/// Frames are re-framed through the codec rather than copied as raw bytes,
/// so malformed client input is dropped per-instruction and file-transfer
/// instructions share one ordered queue with everything else.
async fn browser_to_daemon(ws_rx: &mut SplitStream<WebSocket>, session: &Session) {
    let mut parser = InstructionReader::new();

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => parser.feed(text.as_bytes()),
            Ok(Message::Binary(data)) => parser.feed(&data),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        }

        loop {
            match parser.next() {
                Ok(Some(instruction)) => {
                    if session.send(instruction).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let dropped = parser.recover();
                    tracing::warn!(
                        session_id = %session.id,
                        error = %e,
                        dropped = dropped,
                        "Malformed instruction from browser"
                    );
                }
            }
        }
    }
}

/// Drain the session's outbound queue into the daemon socket
async fn drain_outbound<W>(mut rx: mpsc::Receiver<Instruction>, writer: &mut DaemonWriter<W>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(instruction) = rx.recv().await {
        if writer.send(&instruction).await.is_err() {
            break;
        }
    }
}

/// Run the connect handshake; returns the daemon's connection id
///
/// The daemon owns codec negotiation — the gateway only answers the
/// parameter names the daemon asks for, echoing version markers and filling
/// the rest from the connection settings.
async fn handshake<R, W>(
    reader: &mut DaemonReader<R>,
    writer: &mut DaemonWriter<W>,
    settings: &ConnectionSettings,
) -> Result<String, GatewayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .send(&Instruction::new(
            OP_SELECT,
            vec![settings.protocol.as_str().to_owned()],
        ))
        .await?;

    let requested = expect(reader, OP_ARGS).await?;

    let param = |key: &str, default: &str| {
        settings
            .params
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_owned())
    };
    writer
        .send(&Instruction::new(
            OP_SIZE,
            vec![
                param("width", "1024"),
                param("height", "768"),
                param("dpi", "96"),
            ],
        ))
        .await?;
    writer.send(&Instruction::new(OP_AUDIO, vec![])).await?;
    writer.send(&Instruction::new(OP_VIDEO, vec![])).await?;
    writer
        .send(&Instruction::new(
            OP_IMAGE,
            vec!["image/png".to_owned(), "image/jpeg".to_owned()],
        ))
        .await?;

    let values = requested
        .args
        .iter()
        .map(|name| {
            if name.starts_with("VERSION_") {
                name.clone()
            } else {
                settings.params.get(name).cloned().unwrap_or_default()
            }
        })
        .collect();
    writer.send(&Instruction::new(OP_CONNECT, values)).await?;

    let ready = expect(reader, OP_READY).await?;
    ready
        .arg(0)
        .map(str::to_owned)
        .ok_or_else(|| GatewayError::Handshake("ready carried no connection id".into()))
}

async fn expect<R>(reader: &mut DaemonReader<R>, opcode: &str) -> Result<Instruction, GatewayError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let instruction = reader.next().await?.ok_or_else(|| {
            GatewayError::Handshake(format!("channel closed while awaiting {opcode}"))
        })?;
        if instruction.opcode == "nop" {
            continue;
        }
        if instruction.opcode == opcode {
            return Ok(instruction);
        }
        return Err(GatewayError::Handshake(format!(
            "expected {opcode}, got {}",
            instruction.opcode
        )));
    }
}

/// Instruction-framed reader over the daemon socket
struct DaemonReader<R> {
    inner: R,
    parser: InstructionReader,
}

impl<R: AsyncRead + Unpin> DaemonReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            parser: InstructionReader::new(),
        }
    }

    /// Next instruction, or `None` on a clean EOF
    async fn next(&mut self) -> Result<Option<Instruction>, GatewayError> {
        loop {
            loop {
                match self.parser.next() {
                    Ok(Some(instruction)) => return Ok(Some(instruction)),
                    Ok(None) => break,
                    Err(e) => {
                        let dropped = self.parser.recover();
                        tracing::warn!(
                            error = %e,
                            dropped = dropped,
                            "Malformed instruction from daemon"
                        );
                    }
                }
            }

            let mut chunk = [0u8; 8192];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.parser.feed(&chunk[..n]);
        }
    }
}

/// Instruction writer over the daemon socket
struct DaemonWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> DaemonWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }

    async fn send(&mut self, instruction: &Instruction) -> Result<(), GatewayError> {
        self.inner.write_all(&instruction.encode()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
