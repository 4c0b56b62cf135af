//! Guacamole instruction codec
//!
//! The daemon speaks a text protocol in which every instruction is a
//! comma-separated list of elements terminated by a semicolon, and every
//! element is prefixed by its UTF-8 byte length and a period:
//!
//! ```text
//! 4.blob,1.7,8.aGVsbG8h;
//! └┬─┘ └┬┘ └───┬──────┘
//!  │    │      └ element: 8 bytes of base64 payload
//!  │    └ element: stream index "7"
//!  └ element: opcode "blob"
//! ```
//!
//! Payloads that carry binary data are base64-encoded before they become an
//! element, so length arithmetic only ever sees encoded text. The decoder is
//! an explicit length-prefixed tokenizer: element content may freely contain
//! `.`, `,` and `;` without ambiguity.

pub mod constants;
pub mod instruction;
pub mod reader;

pub use constants::*;
pub use instruction::{decode, Instruction};
pub use reader::InstructionReader;
