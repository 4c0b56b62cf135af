//! HTTP and control-channel surface
//!
//! The gateway's outer shell: an axum router exposing the file-transfer
//! endpoints and health probe, plus the WebSocket endpoint that opens a
//! control channel to the daemon and relays instructions for the lifetime
//! of a session.

pub mod config;
pub mod error;
pub mod http;
pub mod tunnel;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use http::{router, AppState};
