//! Server-side view of request messages.

use crate::codec::BodyReader;
use crate::document::DocumentCodec;
use crate::error::ProtocolError;
use crate::flags::{DeleteFlags, InsertFlags, QueryFlags, UpdateFlags};
use crate::header::{MessageHeader, OpCode};
use bson::Document;

/// A decoded request message.
#[derive(Debug, Clone, PartialEq)]
pub enum Request<D = Document> {
    Update {
        collection: String,
        flags: UpdateFlags,
        selector: D,
        update: D,
    },
    Insert {
        collection: String,
        flags: InsertFlags,
        documents: Vec<D>,
    },
    Query {
        collection: String,
        flags: QueryFlags,
        number_to_skip: i32,
        number_to_return: i32,
        query: D,
        return_fields: Option<D>,
    },
    GetMore {
        collection: String,
        number_to_return: i32,
        cursor_id: i64,
    },
    Delete {
        collection: String,
        flags: DeleteFlags,
        selector: D,
    },
    KillCursors {
        cursor_ids: Vec<i64>,
    },
}

impl<D: DocumentCodec> Request<D> {
    /// Decodes a request body according to the header's opcode.
    pub fn decode(header: &MessageHeader, body: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = BodyReader::new(body);

        let request = match header.op_code {
            OpCode::Update => {
                let _reserved = r.get_i32()?;
                let collection = r.get_cstring()?;
                let flags = UpdateFlags::from_bits(r.get_i32()?);
                Request::Update {
                    collection,
                    flags,
                    selector: r.get_document()?,
                    update: r.get_document()?,
                }
            }
            OpCode::Insert => {
                let flags = InsertFlags::from_bits(r.get_i32()?);
                let collection = r.get_cstring()?;
                let mut documents = Vec::new();
                while r.remaining() > 0 {
                    documents.push(r.get_document()?);
                }
                Request::Insert {
                    collection,
                    flags,
                    documents,
                }
            }
            OpCode::Query => {
                let flags = QueryFlags::from_bits(r.get_i32()?);
                let collection = r.get_cstring()?;
                let number_to_skip = r.get_i32()?;
                let number_to_return = r.get_i32()?;
                let query = r.get_document()?;
                let return_fields = if r.remaining() > 0 {
                    Some(r.get_document()?)
                } else {
                    None
                };
                Request::Query {
                    collection,
                    flags,
                    number_to_skip,
                    number_to_return,
                    query,
                    return_fields,
                }
            }
            OpCode::GetMore => {
                let _reserved = r.get_i32()?;
                Request::GetMore {
                    collection: r.get_cstring()?,
                    number_to_return: r.get_i32()?,
                    cursor_id: r.get_i64()?,
                }
            }
            OpCode::Delete => {
                let _reserved = r.get_i32()?;
                let collection = r.get_cstring()?;
                let flags = DeleteFlags::from_bits(r.get_i32()?);
                Request::Delete {
                    collection,
                    flags,
                    selector: r.get_document()?,
                }
            }
            OpCode::KillCursors => {
                let _reserved = r.get_i32()?;
                let count = r.get_i32()?;
                let mut cursor_ids = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    cursor_ids.push(r.get_i64()?);
                }
                Request::KillCursors { cursor_ids }
            }
            OpCode::Reply => {
                return Err(ProtocolError::UnexpectedOpCode {
                    expected: OpCode::Query,
                    actual: OpCode::Reply,
                })
            }
        };

        Ok(request)
    }
}
