//! OP_REPLY decoding and encoding.
//!
//! Reply body layout:
//!
//! ```text
//! response_flags:i32, cursor_id:i64, starting_from:i32, number_returned:i32, document...
//! ```

use crate::codec::{BodyReader, BodyWriter};
use crate::document::DocumentCodec;
use crate::error::ProtocolError;
use crate::flags::ReplyFlags;
use crate::header::{MessageHeader, OpCode, HEADER_SIZE};
use bson::Document;
use bytes::{BufMut, BytesMut};

/// Size of the fixed part of a reply body.
pub const REPLY_PREFIX_SIZE: usize = 20;

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<D = Document> {
    pub flags: ReplyFlags,
    /// Server cursor id; 0 means there is nothing more to fetch or release.
    pub cursor_id: i64,
    /// Position of the first document of this batch within the cursor.
    pub starting_from: i32,
    pub documents: Vec<D>,
}

impl<D> Reply<D> {
    /// Reads the response flags without decoding any documents.
    pub fn peek_flags(body: &[u8]) -> Result<ReplyFlags, ProtocolError> {
        let mut reader = BodyReader::new(body);
        Ok(ReplyFlags::from_bits(reader.get_i32()?))
    }
}

impl<D: DocumentCodec> Reply<D> {
    /// Decodes a reply body.
    ///
    /// `body` must hold exactly the bytes the header declared
    /// (`message_length - HEADER_SIZE`). Needing more than that is a
    /// [`ProtocolError::LengthMismatch`]: the stream is desynchronized and
    /// cannot be recovered. On success, also returns the number of bytes
    /// left over after the last document, which callers discard.
    pub fn decode(message_length: usize, body: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let mut reader = BodyReader::new(body);
        let overrun = |reader: &BodyReader<'_>, err: ProtocolError| match err {
            ProtocolError::Truncated { needed, .. } => ProtocolError::LengthMismatch {
                declared: message_length,
                required: HEADER_SIZE + reader.consumed() + needed,
            },
            other => other,
        };

        let flags = reader.get_i32().map_err(|e| overrun(&reader, e))?;
        let cursor_id = reader.get_i64().map_err(|e| overrun(&reader, e))?;
        let starting_from = reader.get_i32().map_err(|e| overrun(&reader, e))?;
        let number_returned = reader.get_i32().map_err(|e| overrun(&reader, e))?;

        if number_returned < 0 {
            return Err(ProtocolError::Document(format!(
                "negative document count: {number_returned}"
            )));
        }

        let mut documents = Vec::with_capacity(number_returned as usize);
        for _ in 0..number_returned {
            let doc = reader.get_document::<D>().map_err(|e| overrun(&reader, e))?;
            documents.push(doc);
        }

        let reply = Self {
            flags: ReplyFlags::from_bits(flags),
            cursor_id,
            starting_from,
            documents,
        };
        Ok((reply, reader.remaining()))
    }

    /// Encodes this reply as a complete message answering `response_to`.
    pub fn encode(&self, request_id: i32, response_to: i32) -> Result<BytesMut, ProtocolError> {
        let mut body = BytesMut::with_capacity(REPLY_PREFIX_SIZE + 64 * self.documents.len());
        body.put_i32_le(self.flags.bits());
        body.put_i64_le(self.cursor_id);
        body.put_i32_le(self.starting_from);
        body.put_i32_le(self.documents.len() as i32);
        for doc in &self.documents {
            body.put_document(doc)?;
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
        MessageHeader {
            message_length: (HEADER_SIZE + body.len()) as i32,
            request_id,
            response_to,
            op_code: OpCode::Reply,
        }
        .encode(&mut buf);
        buf.put_slice(&body);
        Ok(buf)
    }
}
