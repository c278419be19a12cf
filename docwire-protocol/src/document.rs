//! Document codec seam.
//!
//! The wire protocol only knows that a document is a self-describing,
//! length-prefixed blob. Turning those bytes into values is delegated to a
//! [`DocumentCodec`]; the provided implementation is BSON.

use crate::error::ProtocolError;
use bson::oid::ObjectId;
use bson::Document;
use bytes::{BufMut, BytesMut};

/// Converts typed values to and from encoded documents.
pub trait DocumentCodec: Sized {
    /// Human-readable name of the document type, used in diagnostics.
    fn type_name() -> &'static str;

    /// Appends the encoded form of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError>;

    /// Decodes one document from the front of `buf`.
    ///
    /// Returns the value and the number of bytes it occupied. When the
    /// length prefix claims more bytes than `buf` holds, returns
    /// [`ProtocolError::Truncated`].
    fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError>;
}

impl DocumentCodec for Document {
    fn type_name() -> &'static str {
        "bson::Document"
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let bytes = bson::to_vec(self)?;
        buf.put_slice(&bytes);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let len = document_len(buf)?;
        let doc = bson::from_slice::<Document>(&buf[..len])?;
        Ok((doc, len))
    }
}

/// Reads and validates the length prefix of the document at the front of `buf`.
pub fn document_len(buf: &[u8]) -> Result<usize, ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4,
            available: buf.len(),
        });
    }

    let len = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    // Smallest document: length prefix plus terminating NUL.
    if len < 5 {
        return Err(ProtocolError::Document(format!(
            "invalid document length: {len}"
        )));
    }

    let len = len as usize;
    if len > buf.len() {
        return Err(ProtocolError::Truncated {
            needed: len,
            available: buf.len(),
        });
    }

    Ok(len)
}

/// Returns a copy of `doc` with an `_id` field, generating one if absent.
///
/// A generated `_id` is placed first. The input is never modified.
pub fn ensure_id(doc: &Document) -> Document {
    if doc.contains_key("_id") {
        return doc.clone();
    }

    let mut with_id = Document::new();
    with_id.insert("_id", ObjectId::new());
    for (key, value) in doc {
        with_id.insert(key.clone(), value.clone());
    }
    with_id
}
