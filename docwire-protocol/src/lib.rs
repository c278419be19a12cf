//! # docwire-protocol
//!
//! Wire protocol implementation for the legacy document-database protocol.
//!
//! This crate provides:
//! - The 16 byte message header and opcodes
//! - Request message builders with the fixed per-opcode field order
//! - Reply decoding with declared-length validation
//! - The document codec seam (BSON by default)
//! - Flag bitfields and protocol errors

pub mod codec;
pub mod document;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod reply;
pub mod request;

pub use codec::{BodyReader, BodyWriter};
pub use document::{ensure_id, DocumentCodec};
pub use error::ProtocolError;
pub use flags::{DeleteFlags, InsertFlags, QueryFlags, ReplyFlags, UpdateFlags};
pub use header::{MessageHeader, OpCode, HEADER_SIZE};
pub use message::Message;
pub use reply::{Reply, REPLY_PREFIX_SIZE};
pub use request::Request;

/// Default server port.
pub const DEFAULT_PORT: u16 = 27017;

/// Maximum accepted message size, header included (48 MB).
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;
