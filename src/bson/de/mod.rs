//! Deserializer

mod deserializer;

use std::{fmt, io};

use serde::de::{MapAccess, SeqAccess, Visitor};

use super::{
    spec::{BinarySubtype, ElementType},
    Binary, Bson, DateTime, DbPointer, Decimal128, Document, JavaScriptCodeWithScope, ObjectId,
    Regex, Timestamp,
};

pub use deserializer::Deserializer;

/// Possible errors that can arise during decoding.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A general I/O error occurred while reading.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// The end of the BSON input was reached prematurely.
    #[error("unexpected end of BSON input")]
    EndOfStream,

    /// The underlying byte stream was not valid BSON.
    #[error("malformed BSON: {message}")]
    MalformedDocument {
        /// A message describing the defect.
        message: String,
    },

    /// An unknown element type tag was encountered.
    #[error("unknown BSON element type {0:#04x}")]
    UnknownElementType(u8),

    /// A value could not be interpreted as the requested type; raised by
    /// `Deserialize` implementations.
    #[error("{message}")]
    Deserialization {
        /// The error message.
        message: String,
    },
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedDocument {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_length(len: i32) -> Self {
        Error::malformed(format!("invalid document length {}", len))
    }

    pub(crate) fn trailing_bytes() -> Self {
        Error::malformed("trailing bytes after document")
    }
}

impl serde::de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Deserialization {
            message: msg.to_string(),
        }
    }
}

/// Alias for `Result<T, de::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Decode a [`Bson`] value into a `T` via its `Deserialize` implementation.
pub fn from_bson<T: serde::de::DeserializeOwned>(bson: Bson) -> Result<T> {
    T::deserialize(Deserializer::new(bson))
}

/// Decode a [`Document`] into a `T`.
pub fn from_document<T: serde::de::DeserializeOwned>(doc: Document) -> Result<T> {
    from_bson(Bson::Document(doc))
}

/// Decode a `T` from BSON bytes.
pub fn from_slice<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    from_document(Document::from_reader(bytes)?)
}

/// Decode a `T` from a BSON byte stream.
pub fn from_reader<R: io::Read, T: serde::de::DeserializeOwned>(reader: R) -> Result<T> {
    from_document(Document::from_reader(reader)?)
}

fn read_u8(reader: &mut &[u8]) -> Result<u8> {
    match reader.split_first() {
        Some((byte, rest)) => {
            *reader = rest;
            Ok(*byte)
        }
        None => Err(Error::EndOfStream),
    }
}

fn read_i32(reader: &mut &[u8]) -> Result<i32> {
    Ok(i32::from_le_bytes(read_bytes::<4>(reader)?))
}

fn read_i64(reader: &mut &[u8]) -> Result<i64> {
    Ok(i64::from_le_bytes(read_bytes::<8>(reader)?))
}

fn read_u32(reader: &mut &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(read_bytes::<4>(reader)?))
}

fn read_bytes<const N: usize>(reader: &mut &[u8]) -> Result<[u8; N]> {
    if reader.len() < N {
        return Err(Error::EndOfStream);
    }
    let (bytes, rest) = reader.split_at(N);
    let out = <[u8; N]>::try_from(bytes).map_err(|_| Error::EndOfStream)?;
    *reader = rest;
    Ok(out)
}

fn read_slice<'a>(reader: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if reader.len() < len {
        return Err(Error::EndOfStream);
    }
    let (bytes, rest) = reader.split_at(len);
    *reader = rest;
    Ok(bytes)
}

fn read_cstring(reader: &mut &[u8]) -> Result<String> {
    let nul = reader
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::malformed("unterminated cstring"))?;
    let (bytes, rest) = reader.split_at(nul);
    let s = std::str::from_utf8(bytes)
        .map_err(|e| Error::malformed(format!("invalid UTF-8 in cstring: {}", e)))?
        .to_string();
    *reader = &rest[1..];
    Ok(s)
}

fn read_string(reader: &mut &[u8]) -> Result<String> {
    let len = read_i32(reader)?;
    if len < 1 {
        return Err(Error::malformed(format!("invalid string length {}", len)));
    }
    let bytes = read_slice(reader, len as usize)?;
    if bytes[len as usize - 1] != 0 {
        return Err(Error::malformed("string missing null terminator"));
    }
    std::str::from_utf8(&bytes[..len as usize - 1])
        .map(str::to_string)
        .map_err(|e| Error::malformed(format!("invalid UTF-8 in string: {}", e)))
}

/// Parses a document, including its length prefix and trailing NUL, from the
/// front of `reader`.
pub(crate) fn read_document(reader: &mut &[u8]) -> Result<Document> {
    let len = read_i32(reader)?;
    if len < 5 {
        return Err(Error::invalid_length(len));
    }
    let mut body = read_slice(reader, len as usize - 4)?;

    let mut doc = Document::new();
    loop {
        let tag = read_u8(&mut body)?;
        if tag == 0 {
            if !body.is_empty() {
                return Err(Error::malformed("bytes remaining after document terminator"));
            }
            return Ok(doc);
        }
        let key = read_cstring(&mut body)?;
        let value = read_element(tag, &mut body)?;
        doc.insert(key, value);
    }
}

fn read_element(tag: u8, reader: &mut &[u8]) -> Result<Bson> {
    let element_type = ElementType::from(tag).ok_or(Error::UnknownElementType(tag))?;

    Ok(match element_type {
        ElementType::Double => {
            let value = f64::from_le_bytes(read_bytes::<8>(reader)?);
            // every NaN bit pattern decodes to the canonical NaN
            Bson::Double(if value.is_nan() { f64::NAN } else { value })
        }
        ElementType::String => Bson::String(read_string(reader)?),
        ElementType::EmbeddedDocument => Bson::Document(read_document(reader)?),
        ElementType::Array => {
            let doc = read_document(reader)?;
            Bson::Array(doc.into_iter().map(|(_, v)| v).collect())
        }
        ElementType::Binary => {
            let mut len = read_i32(reader)?;
            if len < 0 {
                return Err(Error::malformed(format!("invalid binary length {}", len)));
            }
            let subtype = BinarySubtype::from(read_u8(reader)?);
            if subtype == BinarySubtype::BinaryOld {
                // the deprecated subtype wraps the payload in a redundant
                // length prefix
                let inner = read_i32(reader)?;
                if inner != len - 4 {
                    return Err(Error::malformed("mismatched old-binary length prefixes"));
                }
                len = inner;
            }
            Bson::Binary(Binary {
                subtype,
                bytes: read_slice(reader, len as usize)?.to_vec(),
            })
        }
        ElementType::Undefined => Bson::Undefined,
        ElementType::ObjectId => Bson::ObjectId(ObjectId::from_bytes(read_bytes::<12>(reader)?)),
        ElementType::Boolean => match read_u8(reader)? {
            0 => Bson::Boolean(false),
            1 => Bson::Boolean(true),
            other => {
                return Err(Error::malformed(format!("invalid boolean byte {:#04x}", other)));
            }
        },
        ElementType::DateTime => {
            Bson::DateTime(DateTime::from_millis(read_i64(reader)?).clamped())
        }
        ElementType::Null => Bson::Null,
        ElementType::RegularExpression => Bson::RegularExpression(Regex {
            pattern: read_cstring(reader)?,
            options: read_cstring(reader)?,
        }),
        ElementType::DbPointer => Bson::DbPointer(DbPointer {
            namespace: read_string(reader)?,
            id: ObjectId::from_bytes(read_bytes::<12>(reader)?),
        }),
        ElementType::JavaScriptCode => Bson::JavaScriptCode(read_string(reader)?),
        ElementType::Symbol => Bson::Symbol(read_string(reader)?),
        ElementType::JavaScriptCodeWithScope => {
            let total = read_i32(reader)?;
            if total < 14 {
                return Err(Error::malformed(format!(
                    "invalid code-with-scope length {}",
                    total
                )));
            }
            let mut body = read_slice(reader, total as usize - 4)?;
            let code = read_string(&mut body)?;
            let scope = read_document(&mut body)?;
            if !body.is_empty() {
                return Err(Error::trailing_bytes());
            }
            Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope { code, scope })
        }
        ElementType::Int32 => Bson::Int32(read_i32(reader)?),
        ElementType::Timestamp => {
            let increment = read_u32(reader)?;
            let time = read_u32(reader)?;
            Bson::Timestamp(Timestamp { time, increment })
        }
        ElementType::Int64 => Bson::Int64(read_i64(reader)?),
        ElementType::Decimal128 => Bson::Decimal128(Decimal128::from_bytes(read_bytes::<16>(reader)?)),
        ElementType::MinKey => Bson::MinKey,
        ElementType::MaxKey => Bson::MaxKey,
    })
}

/// Visitor used to deserialize arbitrary BSON values, reassembling the
/// marker maps produced by the serde bridge into their value forms.
pub(crate) struct BsonVisitor;

impl<'de> Visitor<'de> for BsonVisitor {
    type Value = Bson;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a BSON value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Bson, E> {
        Ok(Bson::Boolean(v))
    }

    fn visit_i8<E>(self, v: i8) -> std::result::Result<Bson, E> {
        Ok(Bson::Int32(v.into()))
    }

    fn visit_i16<E>(self, v: i16) -> std::result::Result<Bson, E> {
        Ok(Bson::Int32(v.into()))
    }

    fn visit_i32<E>(self, v: i32) -> std::result::Result<Bson, E> {
        Ok(Bson::Int32(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Bson, E> {
        Ok(Bson::Int64(v))
    }

    fn visit_u8<E>(self, v: u8) -> std::result::Result<Bson, E> {
        Ok(Bson::Int32(v.into()))
    }

    fn visit_u16<E>(self, v: u16) -> std::result::Result<Bson, E> {
        Ok(Bson::Int32(v.into()))
    }

    fn visit_u32<E>(self, v: u32) -> std::result::Result<Bson, E> {
        Ok(Bson::from(v))
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Bson, E> {
        match i64::try_from(v) {
            Ok(v) => Ok(Bson::Int64(v)),
            Err(_) => Err(E::custom(format!("unrepresentable integer: {}", v))),
        }
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Bson, E> {
        Ok(Bson::Double(v))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Bson, E> {
        self.visit_string(v.to_string())
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Bson, E> {
        Ok(Bson::String(v))
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Bson, E> {
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: v.to_vec(),
        }))
    }

    fn visit_none<E>(self) -> std::result::Result<Bson, E> {
        Ok(Bson::Null)
    }

    fn visit_unit<E>(self) -> std::result::Result<Bson, E> {
        Ok(Bson::Null)
    }

    fn visit_some<D: serde::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<Bson, D::Error> {
        deserializer.deserialize_any(BsonVisitor)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Bson, A::Error> {
        let mut values = Vec::new();
        while let Some(value) = seq.next_element()? {
            values.push(value);
        }
        Ok(Bson::Array(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Bson, A::Error> {
        let mut doc = Document::new();
        while let Some((key, value)) = map.next_entry::<String, Bson>()? {
            doc.insert(key, value);
        }
        Ok(Bson::from_extended_document(doc))
    }
}
