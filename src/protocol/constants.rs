//! Protocol constants

/// Opcode for a data chunk on a stream: `blob(stream_index, base64_payload)`
pub const OP_BLOB: &str = "blob";

/// Opcode terminating a stream: `end(stream_index)`
pub const OP_END: &str = "end";

/// Opcode acknowledging a stream: `ack(stream_index, status_code, message)`
pub const OP_ACK: &str = "ack";

/// Connect-phase opcodes
pub const OP_SELECT: &str = "select";
pub const OP_ARGS: &str = "args";
pub const OP_SIZE: &str = "size";
pub const OP_AUDIO: &str = "audio";
pub const OP_VIDEO: &str = "video";
pub const OP_IMAGE: &str = "image";
pub const OP_CONNECT: &str = "connect";
pub const OP_READY: &str = "ready";

/// Session teardown opcode
pub const OP_DISCONNECT: &str = "disconnect";

/// Status code carried by a successful `ack`
pub const STATUS_SUCCESS: &str = "0";

/// Maximum length of a single element, in bytes
///
/// A 4 MiB binary chunk grows to ~5.6 MiB of base64; 8 MiB leaves headroom
/// for larger negotiated chunk ceilings without letting a corrupt length
/// prefix allocate without bound.
pub const MAX_ELEMENT_LEN: usize = 8 * 1024 * 1024;

/// Maximum length of a whole buffered instruction, in bytes
pub const MAX_INSTRUCTION_LEN: usize = 9 * 1024 * 1024;

/// Default ceiling for upload chunking (not a protocol limit)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;
