//! Outgoing request messages.
//!
//! Body field order per opcode (after the header):
//!
//! ```text
//! Update:      reserved:i32, collection:cstring, flags:i32, selector, update
//! Insert:      flags:i32, collection:cstring, document...
//! Query:       flags:i32, collection:cstring, skip:i32, return:i32, query, [fields]
//! GetMore:     reserved:i32, collection:cstring, return:i32, cursor_id:i64
//! Delete:      reserved:i32, collection:cstring, flags:i32, selector
//! KillCursors: reserved:i32, count:i32, cursor_id:i64...
//! ```

use crate::codec::BodyWriter;
use crate::document::DocumentCodec;
use crate::error::ProtocolError;
use crate::flags::{DeleteFlags, InsertFlags, QueryFlags, UpdateFlags};
use crate::header::{MessageHeader, OpCode, HEADER_SIZE};
use crate::MAX_MESSAGE_SIZE;
use bytes::{BufMut, Bytes, BytesMut};

/// A request message waiting for a request id.
#[derive(Debug, Clone)]
pub struct Message {
    op_code: OpCode,
    body: BytesMut,
}

impl Message {
    fn with_op(op_code: OpCode) -> Self {
        Self {
            op_code,
            body: BytesMut::with_capacity(256),
        }
    }

    pub fn update<D: DocumentCodec>(
        collection: &str,
        flags: UpdateFlags,
        selector: &D,
        update: &D,
    ) -> Result<Self, ProtocolError> {
        let mut msg = Self::with_op(OpCode::Update);
        msg.body.put_i32_le(0);
        msg.body.put_cstring(collection)?;
        msg.body.put_i32_le(flags.bits());
        msg.body.put_document(selector)?;
        msg.body.put_document(update)?;
        Ok(msg)
    }

    pub fn insert<D: DocumentCodec>(
        collection: &str,
        flags: InsertFlags,
        documents: &[D],
    ) -> Result<Self, ProtocolError> {
        let mut msg = Self::with_op(OpCode::Insert);
        msg.body.put_i32_le(flags.bits());
        msg.body.put_cstring(collection)?;
        for doc in documents {
            msg.body.put_document(doc)?;
        }
        Ok(msg)
    }

    pub fn query<D: DocumentCodec>(
        collection: &str,
        flags: QueryFlags,
        number_to_skip: i32,
        number_to_return: i32,
        query: &D,
        return_fields: Option<&D>,
    ) -> Result<Self, ProtocolError> {
        let mut msg = Self::with_op(OpCode::Query);
        msg.body.put_i32_le(flags.bits());
        msg.body.put_cstring(collection)?;
        msg.body.put_i32_le(number_to_skip);
        msg.body.put_i32_le(number_to_return);
        msg.body.put_document(query)?;
        if let Some(fields) = return_fields {
            msg.body.put_document(fields)?;
        }
        Ok(msg)
    }

    pub fn get_more(
        collection: &str,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Result<Self, ProtocolError> {
        let mut msg = Self::with_op(OpCode::GetMore);
        msg.body.put_i32_le(0);
        msg.body.put_cstring(collection)?;
        msg.body.put_i32_le(number_to_return);
        msg.body.put_i64_le(cursor_id);
        Ok(msg)
    }

    pub fn delete<D: DocumentCodec>(
        collection: &str,
        flags: DeleteFlags,
        selector: &D,
    ) -> Result<Self, ProtocolError> {
        let mut msg = Self::with_op(OpCode::Delete);
        msg.body.put_i32_le(0);
        msg.body.put_cstring(collection)?;
        msg.body.put_i32_le(flags.bits());
        msg.body.put_document(selector)?;
        Ok(msg)
    }

    pub fn kill_cursors(cursor_ids: &[i64]) -> Self {
        let mut msg = Self::with_op(OpCode::KillCursors);
        msg.body.put_i32_le(0);
        msg.body.put_i32_le(cursor_ids.len() as i32);
        for id in cursor_ids {
            msg.body.put_i64_le(*id);
        }
        msg
    }

    pub fn op_code(&self) -> OpCode {
        self.op_code
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Frames the message with a header carrying `request_id`.
    pub fn encode(&self, request_id: i32) -> Result<Bytes, ProtocolError> {
        let total = HEADER_SIZE + self.body.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: total,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        MessageHeader {
            message_length: total as i32,
            request_id,
            response_to: 0,
            op_code: self.op_code,
        }
        .encode(&mut buf);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }
}
