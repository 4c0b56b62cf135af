//! Session state
//!
//! One `Session` per live control-channel connection. The session owns the
//! outbound instruction queue toward the daemon and the table of transfer
//! streams multiplexed over the channel. It is created when the control
//! channel opens and removed when it closes; no session survives its channel.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use super::error::RegistryError;
use super::stream::{ByteSink, TransferStatus, TransferStream};
use crate::error::{GatewayError, TransferError};
use crate::protocol::Instruction;

/// Protocol family spoken on the far side of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    Rdp,
    Ssh,
    Vnc,
}

impl ProtocolFamily {
    /// Wire name used in the `select` instruction
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolFamily::Rdp => "rdp",
            ProtocolFamily::Ssh => "ssh",
            ProtocolFamily::Vnc => "vnc",
        }
    }

    /// Whether recording settings use the terminal-typescript spelling
    pub fn is_terminal(self) -> bool {
        matches!(self, ProtocolFamily::Ssh)
    }
}

impl FromStr for ProtocolFamily {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rdp" => Ok(ProtocolFamily::Rdp),
            "ssh" => Ok(ProtocolFamily::Ssh),
            "vnc" => Ok(ProtocolFamily::Vnc),
            other => Err(GatewayError::Token(format!(
                "unsupported protocol: {other}"
            ))),
        }
    }
}

/// Where the daemon writes the session recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingTarget {
    /// Directory the daemon writes into
    pub path: String,
    /// Artifact name within that directory
    pub name: String,
}

/// Decoded connection configuration
///
/// The gateway accepts an already-decrypted token: base64-encoded JSON of
/// the shape `{"connection": {"type": "...", "settings": {...}}}`. The
/// symmetric cipher around it belongs to an upstream collaborator.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Protocol family for the daemon handshake
    pub protocol: ProtocolFamily,
    /// Daemon connection parameters, stringified
    pub params: HashMap<String, String>,
    /// Recording target, when the settings enable recording
    pub recording: Option<RecordingTarget>,
}

impl ConnectionSettings {
    /// Decode a connection token
    pub fn from_token(token: &str) -> Result<Self, GatewayError> {
        let raw = BASE64
            .decode(token.trim())
            .map_err(|e| GatewayError::Token(format!("not base64: {e}")))?;
        let value: Value = serde_json::from_slice(&raw)
            .map_err(|e| GatewayError::Token(format!("not JSON: {e}")))?;

        let connection = value
            .get("connection")
            .ok_or_else(|| GatewayError::Token("missing \"connection\" object".into()))?;
        let protocol: ProtocolFamily = connection
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Token("missing connection type".into()))?
            .parse()?;

        let mut params = HashMap::new();
        if let Some(settings) = connection.get("settings").and_then(Value::as_object) {
            for (key, value) in settings {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                params.insert(key.clone(), rendered);
            }
        }

        let recording = Self::recording_target(protocol, &params);
        Ok(Self {
            protocol,
            params,
            recording,
        })
    }

    /// Recording is enabled when the settings name a target path
    ///
    /// Graphical protocols use `recording-path`/`recording-name`; terminal
    /// protocols spell the same thing `typescript-path`/`typescript-name`.
    fn recording_target(
        protocol: ProtocolFamily,
        params: &HashMap<String, String>,
    ) -> Option<RecordingTarget> {
        let (path_key, name_key) = if protocol.is_terminal() {
            ("typescript-path", "typescript-name")
        } else {
            ("recording-path", "recording-name")
        };

        let path = params.get(path_key)?.clone();
        let name = params
            .get(name_key)
            .cloned()
            .unwrap_or_else(|| "recording".to_owned());
        Some(RecordingTarget { path, name })
    }

    /// Username parameter, for recording object keys
    pub fn username(&self) -> &str {
        self.params
            .get("username")
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

/// One live control-channel connection
#[derive(Debug)]
pub struct Session {
    /// Opaque identifier, generated at connect time
    pub id: String,
    /// Negotiated settings
    pub settings: ConnectionSettings,
    /// Creation timestamp
    pub connected_at: DateTime<Utc>,
    /// Connection identifier the daemon reported in `ready`
    daemon_id: OnceLock<String>,
    /// Outbound instruction queue, drained by the channel writer task
    outbound: mpsc::Sender<Instruction>,
    /// Set once the control channel is gone
    closed: AtomicBool,
    /// Transfer streams keyed by stream index
    streams: Mutex<HashMap<String, TransferStream>>,
}

impl Session {
    /// Create a session around an open control channel
    pub fn new(
        id: impl Into<String>,
        settings: ConnectionSettings,
        outbound: mpsc::Sender<Instruction>,
    ) -> Self {
        Self {
            id: id.into(),
            settings,
            connected_at: Utc::now(),
            daemon_id: OnceLock::new(),
            outbound,
            closed: AtomicBool::new(false),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Record the connection id the daemon assigned in `ready`
    pub fn set_daemon_id(&self, id: String) {
        let _ = self.daemon_id.set(id);
    }

    /// Daemon-assigned connection id, if the handshake completed
    pub fn daemon_id(&self) -> Option<&str> {
        self.daemon_id.get().map(String::as_str)
    }

    /// Queue an instruction for the daemon
    ///
    /// Awaiting the bounded queue is the transfer pipelines' backpressure:
    /// a writer that cannot drain suspends its producers instead of
    /// buffering without bound.
    pub async fn send(&self, instruction: Instruction) -> Result<(), TransferError> {
        if self.is_closed() {
            return Err(TransferError::Aborted("control channel closed".into()));
        }
        self.outbound
            .send(instruction)
            .await
            .map_err(|_| TransferError::Aborted("control channel closed".into()))
    }

    /// Whether the control channel has closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register a transfer stream
    ///
    /// Errors rather than overwrites when the key is occupied. The key
    /// becomes reusable once the previous stream reaches a terminal state
    /// and is removed.
    pub fn register_stream(
        &self,
        stream_index: &str,
        stream: TransferStream,
    ) -> Result<(), RegistryError> {
        let mut streams = self.streams.lock().unwrap();
        if streams.contains_key(stream_index) {
            return Err(RegistryError::StreamConflict {
                session_id: self.id.clone(),
                stream_index: stream_index.to_owned(),
            });
        }
        streams.insert(stream_index.to_owned(), stream);
        Ok(())
    }

    /// Clone the response sink of a download stream
    pub fn stream_sink(&self, stream_index: &str) -> Option<ByteSink> {
        let mut streams = self.streams.lock().unwrap();
        streams.get_mut(stream_index).and_then(TransferStream::sink)
    }

    /// Account bytes against a stream; returns false for unknown indices
    pub fn add_stream_bytes(&self, stream_index: &str, n: u64) -> bool {
        let mut streams = self.streams.lock().unwrap();
        match streams.get_mut(stream_index) {
            Some(stream) => {
                stream.add_bytes(n);
                true
            }
            None => false,
        }
    }

    /// Whether a transfer stream exists for this index
    pub fn has_stream(&self, stream_index: &str) -> bool {
        self.streams.lock().unwrap().contains_key(stream_index)
    }

    /// Number of open transfer streams
    pub fn open_streams(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    /// Move a stream to a terminal state and remove it
    pub fn finish_stream(
        &self,
        stream_index: &str,
        status: TransferStatus,
    ) -> Option<TransferStream> {
        let mut streams = self.streams.lock().unwrap();
        let mut stream = streams.remove(stream_index)?;
        stream.finish(status);
        Some(stream)
    }

    /// Close the session, force-finalizing every open stream
    ///
    /// Download sinks receive an abort so their pending responses terminate
    /// instead of hanging; in-flight uploads observe the closed flag and
    /// fail with `TransferAborted`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let drained: Vec<(String, TransferStream)> = {
            let mut streams = self.streams.lock().unwrap();
            streams.drain().collect()
        };

        for (index, mut stream) in drained {
            let sink = stream.sink();
            stream.finish(TransferStatus::Failed);
            tracing::debug!(
                session_id = %self.id,
                stream_index = %index,
                direction = ?stream.direction,
                bytes = stream.bytes_transferred,
                "Force-finalizing stream on session close"
            );
            if let Some(sink) = sink {
                let _ = sink
                    .send(Err(TransferError::Aborted(
                        "control channel closed".into(),
                    )))
                    .await;
            }
        }
    }
}
