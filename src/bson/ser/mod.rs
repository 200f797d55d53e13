//! Serializer

mod serializer;

use std::{fmt, io};

use super::{Bson, Document};

pub use serializer::Serializer;

/// Possible errors that can arise during encoding.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A general I/O error occurred while writing.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// A key could not be serialized to a BSON string.
    #[error("invalid document key: {key}")]
    InvalidDocumentKey {
        /// The offending key.
        key: String,
    },

    /// A key or regular expression contained an interior NUL byte, which the
    /// wire format cannot represent.
    #[error("cstrings cannot contain interior null bytes: {string:?}")]
    InvalidCString {
        /// The offending string.
        string: String,
    },

    /// An unsigned integer exceeded the range of `i64`.
    #[error("unsigned integer {0} cannot be represented in BSON")]
    UnsignedIntegerExceededRange(u64),

    /// A value could not be represented; raised by `Serialize`
    /// implementations.
    #[error("{message}")]
    Serialization {
        /// The error message.
        message: String,
    },

    /// A document exceeded the 2 GiB wire format size limit.
    #[error("document exceeds the maximum encodable size")]
    DocumentTooLarge,
}

impl serde::ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Serialization {
            message: msg.to_string(),
        }
    }
}

/// Alias for `Result<T, ser::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Encode a `T` into a [`Bson`] value via its `Serialize` implementation.
/// This is the extension point for user types: anything serializing to a map
/// becomes an embedded document.
pub fn to_bson<T: serde::Serialize>(value: &T) -> Result<Bson> {
    value.serialize(Serializer::new())
}

/// Encode a `T` into a [`Document`]. Fails if `T` does not serialize to a
/// map.
pub fn to_document<T: serde::Serialize>(value: &T) -> Result<Document> {
    match to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(Error::Serialization {
            message: format!("expected value to serialize to a document, got {:?}", other),
        }),
    }
}

/// Encode a `T` into BSON bytes.
pub fn to_vec<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    to_document(value)?.to_vec()
}

pub(crate) fn write_cstring(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::InvalidCString {
            string: s.to_string(),
        });
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as i32 + 1).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Serializes a document to the length-prefixed wire form, appended to `buf`.
pub(crate) fn write_document(buf: &mut Vec<u8>, doc: &Document) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);

    for (key, value) in doc.iter() {
        write_element(buf, key, value)?;
    }

    buf.push(0);
    let len = i32::try_from(buf.len() - start).map_err(|_| Error::DocumentTooLarge)?;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_element(buf: &mut Vec<u8>, key: &str, value: &Bson) -> Result<()> {
    buf.push(value.element_type() as u8);
    write_cstring(buf, key)?;

    match value {
        Bson::Double(v) => {
            // normalize every NaN to the canonical bit pattern
            let v = if v.is_nan() { f64::NAN } else { *v };
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Bson::String(v) | Bson::JavaScriptCode(v) | Bson::Symbol(v) => write_string(buf, v),
        Bson::Document(v) => write_document(buf, v)?,
        Bson::Array(v) => {
            let start = buf.len();
            buf.extend_from_slice(&[0u8; 4]);
            let mut index_buf = itoa_buffer();
            for (i, item) in v.iter().enumerate() {
                write_element(buf, index_str(&mut index_buf, i), item)?;
            }
            buf.push(0);
            let len = i32::try_from(buf.len() - start).map_err(|_| Error::DocumentTooLarge)?;
            buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
        }
        Bson::Boolean(v) => buf.push(u8::from(*v)),
        Bson::Null | Bson::Undefined | Bson::MinKey | Bson::MaxKey => {}
        Bson::RegularExpression(v) => {
            write_cstring(buf, &v.pattern)?;
            write_cstring(buf, &v.options)?;
        }
        Bson::JavaScriptCodeWithScope(v) => {
            let start = buf.len();
            buf.extend_from_slice(&[0u8; 4]);
            write_string(buf, &v.code);
            write_document(buf, &v.scope)?;
            let len = i32::try_from(buf.len() - start).map_err(|_| Error::DocumentTooLarge)?;
            buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
        }
        Bson::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Bson::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Bson::Timestamp(v) => {
            buf.extend_from_slice(&v.increment.to_le_bytes());
            buf.extend_from_slice(&v.time.to_le_bytes());
        }
        Bson::Binary(v) => {
            // the deprecated BinaryOld subtype carries a redundant inner
            // length prefix
            let old = v.subtype == super::spec::BinarySubtype::BinaryOld;
            let len = v.bytes.len() + if old { 4 } else { 0 };
            buf.extend_from_slice(
                &i32::try_from(len)
                    .map_err(|_| Error::DocumentTooLarge)?
                    .to_le_bytes(),
            );
            buf.push(u8::from(v.subtype));
            if old {
                buf.extend_from_slice(&(v.bytes.len() as i32).to_le_bytes());
            }
            buf.extend_from_slice(&v.bytes);
        }
        Bson::ObjectId(v) => buf.extend_from_slice(&v.bytes()),
        Bson::DateTime(v) => buf.extend_from_slice(&v.timestamp_millis().to_le_bytes()),
        Bson::Decimal128(v) => buf.extend_from_slice(&v.bytes()),
        Bson::DbPointer(v) => {
            write_string(buf, &v.namespace);
            buf.extend_from_slice(&v.id.bytes());
        }
    }

    Ok(())
}

fn itoa_buffer() -> [u8; 20] {
    [0u8; 20]
}

/// Formats an array index without allocating.
fn index_str(buf: &mut [u8; 20], mut i: usize) -> &str {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (i % 10) as u8;
        i /= 10;
        if i == 0 {
            break;
        }
    }
    // only ASCII digits were written
    std::str::from_utf8(&buf[pos..]).unwrap_or("0")
}
