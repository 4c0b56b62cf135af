//! Connection registry
//!
//! Maps opaque session identifiers to live control-channel handles and the
//! transfer streams multiplexed over them.
//!
//! # Architecture
//!
//! ```text
//!                      Arc<ConnectionRegistry>
//!                 ┌────────────────────────────────┐
//!                 │ sessions: HashMap<SessionId,   │
//!                 │   Session {                    │
//!                 │     settings,                  │
//!                 │     outbound: mpsc -> daemon,  │
//!                 │     streams: HashMap<Index,    │
//!                 │       TransferStream>,         │
//!                 │   }                            │
//!                 │ >                              │
//!                 └───────────────┬────────────────┘
//!                                 │
//!          ┌──────────────────────┼──────────────────────┐
//!          │                      │                      │
//!          ▼                      ▼                      ▼
//!    [HTTP upload]          [HTTP download]       [relay loop]
//!    session.send(blob)     sink -> response      on_blob()/on_end()
//! ```
//!
//! The registry is an explicit value handed to both the HTTP layer and the
//! control-channel relay; there is no global connection table. Removing a
//! session force-finalizes every transfer stream still open on it — a closed
//! session never leaves a dangling stream behind.

pub mod error;
pub mod session;
pub mod store;
pub mod stream;

pub use error::RegistryError;
pub use session::{ConnectionSettings, ProtocolFamily, RecordingTarget, Session};
pub use store::ConnectionRegistry;
pub use stream::{ByteSink, Direction, TransferStream, TransferStatus};
