//! BSON definition and codec.
//!
//! This module implements the [BSON specification](http://bsonspec.org):
//! the dynamically typed [`Bson`] value, the insertion-ordered [`Document`]
//! map, the binary codec, and a serde `Serializer`/`Deserializer` pair over
//! the value tree so that typed structs can be converted to and from BSON.

#[macro_use]
mod macros;
pub mod datetime;
pub(crate) mod de;
pub mod decimal128;
pub mod document;
pub mod oid;
pub(crate) mod ser;
pub mod spec;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use self::macros::{bson, doc};
pub use self::{
    datetime::DateTime,
    de::{from_bson, from_document, from_reader, from_slice, Error as DeError},
    decimal128::Decimal128,
    document::Document,
    oid::ObjectId,
    ser::{to_bson, to_document, to_vec, Error as SerError},
};
use self::spec::{BinarySubtype, ElementType};

/// An array of [`Bson`] values.
pub type Array = Vec<Bson>;

/// Possible BSON value types.
#[derive(Clone, PartialEq)]
pub enum Bson {
    /// 64-bit binary floating point
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Array
    Array(Array),
    /// Embedded document
    Document(Document),
    /// Boolean value
    Boolean(bool),
    /// Null value
    Null,
    /// Regular expression
    RegularExpression(Regex),
    /// JavaScript code
    JavaScriptCode(String),
    /// JavaScript code with scope
    JavaScriptCodeWithScope(JavaScriptCodeWithScope),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// Timestamp
    Timestamp(Timestamp),
    /// Binary data
    Binary(Binary),
    /// [ObjectId](http://dochub.mongodb.org/core/objectids)
    ObjectId(oid::ObjectId),
    /// UTC datetime
    DateTime(DateTime),
    /// Symbol (deprecated; decoded for compatibility)
    Symbol(String),
    /// [128-bit decimal floating point](https://github.com/mongodb/specifications/blob/master/source/bson-decimal128/decimal128.rst)
    Decimal128(Decimal128),
    /// Undefined value (deprecated; decoded for compatibility)
    Undefined,
    /// Max key
    MaxKey,
    /// Min key
    MinKey,
    /// DBPointer (deprecated; decoded for compatibility)
    DbPointer(DbPointer),
}

impl Bson {
    /// The `ElementType` of this value.
    pub fn element_type(&self) -> ElementType {
        match self {
            Bson::Double(..) => ElementType::Double,
            Bson::String(..) => ElementType::String,
            Bson::Array(..) => ElementType::Array,
            Bson::Document(..) => ElementType::EmbeddedDocument,
            Bson::Boolean(..) => ElementType::Boolean,
            Bson::Null => ElementType::Null,
            Bson::RegularExpression(..) => ElementType::RegularExpression,
            Bson::JavaScriptCode(..) => ElementType::JavaScriptCode,
            Bson::JavaScriptCodeWithScope(..) => ElementType::JavaScriptCodeWithScope,
            Bson::Int32(..) => ElementType::Int32,
            Bson::Int64(..) => ElementType::Int64,
            Bson::Timestamp(..) => ElementType::Timestamp,
            Bson::Binary(..) => ElementType::Binary,
            Bson::ObjectId(..) => ElementType::ObjectId,
            Bson::DateTime(..) => ElementType::DateTime,
            Bson::Symbol(..) => ElementType::Symbol,
            Bson::Decimal128(..) => ElementType::Decimal128,
            Bson::Undefined => ElementType::Undefined,
            Bson::MaxKey => ElementType::MaxKey,
            Bson::MinKey => ElementType::MinKey,
            Bson::DbPointer(..) => ElementType::DbPointer,
        }
    }

    /// If this value is a `Bson::String`, returns the associated `&str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    /// If this value is a `Bson::Int32`, returns the associated `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// If this value is a `Bson::Int64`, returns the associated `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// If this value is a `Bson::Double`, returns the associated `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// If this value is a `Bson::Boolean`, returns the associated `bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// If this value is a `Bson::Document`, returns a reference to it.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    /// If this value is a `Bson::Array`, returns a reference to it.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    /// If this value is a `Bson::ObjectId`, returns it.
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    /// If this value is a `Bson::Timestamp`, returns it.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Bson::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// If this value is `Bson::Null`, returns `()`.
    pub fn as_null(&self) -> Option<()> {
        match self {
            Bson::Null => Some(()),
            _ => None,
        }
    }

    /// The integral value of an `Int32`, `Int64` or exactly-integral `Double`.
    /// Used for fields like `ok` and `n` which servers send with varying
    /// numeric types.
    pub(crate) fn as_integer(&self) -> Option<i64> {
        match *self {
            Bson::Int32(i) => Some(i64::from(i)),
            Bson::Int64(i) => Some(i),
            Bson::Double(f) if (f - (f as i64 as f64)).abs() <= f64::EPSILON => Some(f as i64),
            _ => None,
        }
    }
}

impl fmt::Debug for Bson {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bson::Double(v) => write!(f, "Double({:?})", v),
            Bson::String(v) => write!(f, "String({:?})", v),
            Bson::Array(v) => write!(f, "Array({:?})", v),
            Bson::Document(v) => write!(f, "Document({:?})", v),
            Bson::Boolean(v) => write!(f, "Boolean({:?})", v),
            Bson::Null => f.write_str("Null"),
            Bson::RegularExpression(v) => write!(f, "RegularExpression({:?})", v),
            Bson::JavaScriptCode(v) => write!(f, "JavaScriptCode({:?})", v),
            Bson::JavaScriptCodeWithScope(v) => write!(f, "JavaScriptCodeWithScope({:?})", v),
            Bson::Int32(v) => write!(f, "Int32({:?})", v),
            Bson::Int64(v) => write!(f, "Int64({:?})", v),
            Bson::Timestamp(v) => write!(f, "{:?}", v),
            Bson::Binary(v) => write!(f, "{:?}", v),
            Bson::ObjectId(v) => write!(f, "{:?}", v),
            Bson::DateTime(v) => write!(f, "DateTime({})", v),
            Bson::Symbol(v) => write!(f, "Symbol({:?})", v),
            Bson::Decimal128(v) => write!(f, "{:?}", v),
            Bson::Undefined => f.write_str("Undefined"),
            Bson::MaxKey => f.write_str("MaxKey"),
            Bson::MinKey => f.write_str("MinKey"),
            Bson::DbPointer(v) => write!(f, "{:?}", v),
        }
    }
}

impl fmt::Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bson::Double(v) => write!(f, "{}", v),
            Bson::String(v) => write!(f, "\"{}\"", v),
            Bson::Array(v) => {
                f.write_str("[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Bson::Document(v) => write!(f, "{}", v),
            Bson::Boolean(v) => write!(f, "{}", v),
            Bson::Null => f.write_str("null"),
            Bson::RegularExpression(v) => write!(f, "{}", v),
            Bson::JavaScriptCode(v) => f.write_str(v),
            Bson::JavaScriptCodeWithScope(v) => f.write_str(&v.code),
            Bson::Int32(v) => write!(f, "{}", v),
            Bson::Int64(v) => write!(f, "{}", v),
            Bson::Timestamp(v) => write!(f, "{}", v),
            Bson::Binary(v) => write!(f, "{}", v),
            Bson::ObjectId(v) => write!(f, "ObjectId(\"{}\")", v),
            Bson::DateTime(v) => write!(f, "DateTime(\"{}\")", v),
            Bson::Symbol(v) => write!(f, "Symbol(\"{}\")", v),
            Bson::Decimal128(v) => write!(f, "{}", v),
            Bson::Undefined => f.write_str("undefined"),
            Bson::MaxKey => f.write_str("MaxKey"),
            Bson::MinKey => f.write_str("MinKey"),
            Bson::DbPointer(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<f32> for Bson {
    fn from(v: f32) -> Bson {
        Bson::Double(v.into())
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Bson {
        Bson::Double(v)
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Bson {
        Bson::String(v.to_string())
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Bson {
        Bson::String(v)
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Bson {
        Bson::Boolean(v)
    }
}

impl From<i8> for Bson {
    fn from(v: i8) -> Bson {
        Bson::Int32(v.into())
    }
}

impl From<i16> for Bson {
    fn from(v: i16) -> Bson {
        Bson::Int32(v.into())
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Bson {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Bson {
        Bson::Int64(v)
    }
}

impl From<u8> for Bson {
    fn from(v: u8) -> Bson {
        Bson::Int32(v.into())
    }
}

impl From<u16> for Bson {
    fn from(v: u16) -> Bson {
        Bson::Int32(v.into())
    }
}

impl From<u32> for Bson {
    fn from(v: u32) -> Bson {
        match i32::try_from(v) {
            Ok(i) => Bson::Int32(i),
            Err(_) => Bson::Int64(v.into()),
        }
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Bson {
        Bson::Document(v)
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Bson {
        Bson::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Bson {
        match v {
            Some(v) => v.into(),
            None => Bson::Null,
        }
    }
}

impl From<&Bson> for Bson {
    fn from(v: &Bson) -> Bson {
        v.clone()
    }
}

/// Represents a BSON timestamp value: an ordinal paired with a seconds value,
/// used internally by MongoDB for replication and cluster time.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Timestamp {
    /// The number of seconds since the Unix epoch.
    pub time: u32,

    /// An incrementing ordinal for operations within a given second.
    pub increment: u32,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.time, self.increment)
    }
}

impl From<Timestamp> for Bson {
    fn from(ts: Timestamp) -> Self {
        Bson::Timestamp(ts)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_map(Some(1))?;
        // carried bit-for-bit as an i64 so post-2038 seconds still fit
        let value = ((u64::from(self.time) << 32) | u64::from(self.increment)) as i64;
        serde::ser::SerializeMap::serialize_entry(&mut state, "$timestamp", &value)?;
        serde::ser::SerializeMap::end(state)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Bson::deserialize(deserializer)? {
            Bson::Timestamp(ts) => Ok(ts),
            other => Err(serde::de::Error::custom(format!(
                "expected Timestamp, found {:?}",
                other
            ))),
        }
    }
}

/// Represents a BSON binary value with its one-byte subtype.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    /// The subtype of the binary value.
    pub subtype: BinarySubtype,

    /// The binary bytes.
    pub bytes: Vec<u8>,
}

impl Binary {
    /// Creates a new uuid-subtype `Binary` from the provided uuid bytes.
    pub(crate) fn from_uuid_bytes(bytes: [u8; 16]) -> Self {
        Self {
            subtype: BinarySubtype::Uuid,
            bytes: bytes.to_vec(),
        }
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Binary({:#04x}, {})",
            u8::from(self.subtype),
            base64_encode(&self.bytes)
        )
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "BinData({:#04x}, {})",
            u8::from(self.subtype),
            base64_encode(&self.bytes)
        )
    }
}

impl From<Binary> for Bson {
    fn from(b: Binary) -> Self {
        Bson::Binary(b)
    }
}

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut state = serializer.serialize_map(Some(2))?;
        state.serialize_entry("$binaryBase64", &base64_encode(&self.bytes))?;
        state.serialize_entry("$binarySubtype", &i32::from(u8::from(self.subtype)))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Bson::deserialize(deserializer)? {
            Bson::Binary(b) => Ok(b),
            other => Err(serde::de::Error::custom(format!(
                "expected Binary, found {:?}",
                other
            ))),
        }
    }
}

/// Represents a BSON regular expression value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Regex {
    /// The regex pattern to match.
    pub pattern: String,

    /// The options for the regex.
    pub options: String,
}

impl fmt::Display for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.options)
    }
}

impl From<Regex> for Bson {
    fn from(r: Regex) -> Self {
        Bson::RegularExpression(r)
    }
}

/// Represents a BSON code with scope value.
#[derive(Clone, Debug, PartialEq)]
pub struct JavaScriptCodeWithScope {
    /// The JavaScript code.
    pub code: String,

    /// The scope document containing variable bindings.
    pub scope: Document,
}

impl From<JavaScriptCodeWithScope> for Bson {
    fn from(c: JavaScriptCodeWithScope) -> Self {
        Bson::JavaScriptCodeWithScope(c)
    }
}

/// Represents a DBPointer value, which is deprecated but may still appear in
/// data written by very old servers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DbPointer {
    pub(crate) namespace: String,
    pub(crate) id: ObjectId,
}

pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub(crate) fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}

impl Bson {
    /// Reassembles BSON types that the serde bridge renders as single-key
    /// marker maps ("$oid", "$date", etc). Maps that do not exactly match a
    /// marker pattern are left untouched.
    pub(crate) fn from_extended_document(doc: Document) -> Bson {
        if doc.len() > 2 {
            return Bson::Document(doc);
        }

        let mut keys: Vec<&str> = doc.keys().map(AsRef::as_ref).collect();
        keys.sort_unstable();

        match keys.as_slice() {
            ["$oid"] => {
                if let Ok(hex) = doc.get_str("$oid") {
                    if let Ok(oid) = ObjectId::parse_str(hex) {
                        return Bson::ObjectId(oid);
                    }
                }
            }
            ["$date"] => {
                if let Ok(millis) = doc.get_i64("$date") {
                    return Bson::DateTime(DateTime::from_millis(millis));
                }
            }
            ["$timestamp"] => {
                if let Some(value) = doc.get("$timestamp").and_then(Bson::as_integer) {
                    let value = value as u64;
                    return Bson::Timestamp(Timestamp {
                        time: (value >> 32) as u32,
                        increment: value as u32,
                    });
                }
            }
            ["$binaryBase64", "$binarySubtype"] => {
                if let (Ok(b64), Ok(subtype)) =
                    (doc.get_str("$binaryBase64"), doc.get_i32("$binarySubtype"))
                {
                    if let (Some(bytes), Ok(subtype)) = (base64_decode(b64), u8::try_from(subtype))
                    {
                        return Bson::Binary(Binary {
                            subtype: subtype.into(),
                            bytes,
                        });
                    }
                }
            }
            ["$numberDecimalBytes"] => {
                if let Ok(hex) = doc.get_str("$numberDecimalBytes") {
                    if let Ok(bytes) = hex::decode(hex) {
                        if let Ok(bytes) = <[u8; 16]>::try_from(bytes.as_slice()) {
                            return Bson::Decimal128(Decimal128::from_bytes(bytes));
                        }
                    }
                }
            }
            ["$regularExpression"] => {
                if let Ok(body) = doc.get_document("$regularExpression") {
                    if let (Ok(pattern), Ok(options)) =
                        (body.get_str("pattern"), body.get_str("options"))
                    {
                        return Bson::RegularExpression(Regex {
                            pattern: pattern.to_string(),
                            options: options.to_string(),
                        });
                    }
                }
            }
            ["$symbol"] => {
                if let Ok(symbol) = doc.get_str("$symbol") {
                    return Bson::Symbol(symbol.to_string());
                }
            }
            ["$code"] => {
                if let Ok(code) = doc.get_str("$code") {
                    return Bson::JavaScriptCode(code.to_string());
                }
            }
            ["$code", "$scope"] => {
                if let (Ok(code), Ok(scope)) = (doc.get_str("$code"), doc.get_document("$scope")) {
                    return Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                        code: code.to_string(),
                        scope: scope.clone(),
                    });
                }
            }
            ["$dbPointer"] => {
                if let Ok(body) = doc.get_document("$dbPointer") {
                    if let (Ok(ns), Ok(id)) = (body.get_str("$ref"), body.get_object_id("$id")) {
                        return Bson::DbPointer(DbPointer {
                            namespace: ns.to_string(),
                            id,
                        });
                    }
                }
            }
            ["$minKey"] => return Bson::MinKey,
            ["$maxKey"] => return Bson::MaxKey,
            ["$undefined"] => return Bson::Undefined,
            _ => {}
        }

        Bson::Document(doc)
    }
}

impl Serialize for Bson {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self {
            Bson::Double(v) => serializer.serialize_f64(*v),
            Bson::String(v) => serializer.serialize_str(v),
            Bson::Array(v) => {
                let mut seq = serializer.serialize_seq(Some(v.len()))?;
                for item in v {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Bson::Document(v) => v.serialize(serializer),
            Bson::Boolean(v) => serializer.serialize_bool(*v),
            Bson::Null => serializer.serialize_unit(),
            Bson::Int32(v) => serializer.serialize_i32(*v),
            Bson::Int64(v) => serializer.serialize_i64(*v),
            Bson::ObjectId(v) => v.serialize(serializer),
            Bson::DateTime(v) => v.serialize(serializer),
            Bson::Timestamp(v) => v.serialize(serializer),
            Bson::Binary(v) => v.serialize(serializer),
            Bson::Decimal128(v) => v.serialize(serializer),
            Bson::RegularExpression(v) => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry(
                    "$regularExpression",
                    &doc! { "pattern": v.pattern.clone(), "options": v.options.clone() },
                )?;
                state.end()
            }
            Bson::JavaScriptCode(v) => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry("$code", v)?;
                state.end()
            }
            Bson::JavaScriptCodeWithScope(v) => {
                let mut state = serializer.serialize_map(Some(2))?;
                state.serialize_entry("$code", &v.code)?;
                state.serialize_entry("$scope", &v.scope)?;
                state.end()
            }
            Bson::Symbol(v) => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry("$symbol", v)?;
                state.end()
            }
            Bson::DbPointer(v) => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry(
                    "$dbPointer",
                    &doc! { "$ref": v.namespace.clone(), "$id": v.id },
                )?;
                state.end()
            }
            Bson::MinKey => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry("$minKey", &1i32)?;
                state.end()
            }
            Bson::MaxKey => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry("$maxKey", &1i32)?;
                state.end()
            }
            Bson::Undefined => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry("$undefined", &true)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Bson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(de::BsonVisitor)
    }
}
