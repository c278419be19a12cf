//! Primitive readers and writers for message bodies.
//!
//! All integers are little-endian. Strings are NUL-terminated UTF-8.

use crate::document::DocumentCodec;
use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Appends body fields to a buffer.
pub trait BodyWriter {
    /// Appends `value` followed by a NUL terminator.
    fn put_cstring(&mut self, value: &str) -> Result<(), ProtocolError>;

    /// Appends an encoded document.
    fn put_document<D: DocumentCodec>(&mut self, doc: &D) -> Result<(), ProtocolError>;
}

impl BodyWriter for BytesMut {
    fn put_cstring(&mut self, value: &str) -> Result<(), ProtocolError> {
        if value.as_bytes().contains(&0) {
            return Err(ProtocolError::InvalidCString);
        }
        self.put_slice(value.as_bytes());
        self.put_u8(0);
        Ok(())
    }

    fn put_document<D: DocumentCodec>(&mut self, doc: &D) -> Result<(), ProtocolError> {
        doc.encode(self)
    }
}

/// Sequential reader over a message body that tracks how much it consumed.
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Bytes left unread.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i64(&mut self) -> Result<i64, ProtocolError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn get_cstring(&mut self) -> Result<String, ProtocolError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::InvalidCString)?;
        let value = std::str::from_utf8(&rest[..end])
            .map_err(|_| ProtocolError::InvalidCString)?
            .to_string();
        self.pos += end + 1;
        Ok(value)
    }

    pub fn get_document<D: DocumentCodec>(&mut self) -> Result<D, ProtocolError> {
        let (doc, used) = D::decode(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(doc)
    }
}
