//! File-transfer pipelines
//!
//! Two directions over one session's control channel:
//!
//! - [`upload`]: an HTTP request body becomes a sequence of `blob`
//!   instructions followed by `end`, re-chunked to a fixed ceiling.
//! - [`download`]: `blob` instructions intercepted from the control channel
//!   are decoded and relayed, in arrival order, into a pending HTTP
//!   response.
//!
//! Both register a `TransferStream` for their (session, stream index) key
//! for exactly the duration of the transfer.

pub mod download;
pub mod upload;

pub use download::{begin as begin_download, DownloadStart, PendingDownload};
pub use upload::{upload, UploadReport};
