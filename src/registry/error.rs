//! Registry error types

use thiserror::Error;

use crate::error::TransferError;

/// Error type for registry operations
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A session with this identifier is already registered
    #[error("session {0} already registered")]
    SessionExists(String),
    /// A transfer stream already exists for this (session, stream index)
    ///
    /// Registration never overwrites: a second stream on the same key would
    /// silently hijack an in-progress transfer.
    #[error("stream {stream_index} already active on session {session_id}")]
    StreamConflict {
        session_id: String,
        stream_index: String,
    },
}

impl From<RegistryError> for TransferError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::StreamConflict {
                session_id,
                stream_index,
            } => TransferError::StreamConflict {
                session_id,
                stream_index,
            },
            RegistryError::SessionExists(id) => {
                TransferError::Aborted(format!("session {id} already registered"))
            }
        }
    }
}
