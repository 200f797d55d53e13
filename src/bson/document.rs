//! A BSON document represented as an associative HashMap with retained key order.

use std::{
    fmt,
    io::{Read, Write},
    iter::FromIterator,
};

use indexmap::IndexMap;
use serde::{de::Deserializer, ser::SerializeMap, Deserialize, Serialize, Serializer};

use super::{de, oid::ObjectId, ser, Array, Binary, Bson, DateTime, Timestamp};
use crate::bson::spec::BinarySubtype;

/// Error to indicate that either a value was empty or it contained an
/// unexpected type, for use with the direct getters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ValueAccessError {
    /// Cannot find the expected field with the specified key.
    #[error("value not present")]
    NotPresent,
    /// Found a Bson value with the specified key, but not with the expected
    /// type.
    #[error("value with unexpected type")]
    UnexpectedType,
}

/// Result of accessing a Bson value.
pub type ValueAccessResult<T> = std::result::Result<T, ValueAccessError>;

/// A BSON document represented as an associative map with retained key
/// insertion order. Because iteration follows insertion order, a `Document`
/// can express order-sensitive constructs such as sort specifications and
/// aggregation pipelines directly.
#[derive(Clone, PartialEq, Default)]
pub struct Document {
    inner: IndexMap<String, Bson>,
}

impl Document {
    /// Creates a new empty `Document`.
    pub fn new() -> Document {
        Document::default()
    }

    /// Gets an iterator over the entries of the map, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.inner.iter()
    }

    /// Clears the document, removing all values.
    pub fn clear(&mut self) {
        self.inner.clear()
    }

    /// Returns a reference to the `Bson` corresponding to the key.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&Bson> {
        self.inner.get(key.as_ref())
    }

    /// Gets a mutable reference to the `Bson` corresponding to the key.
    pub fn get_mut(&mut self, key: impl AsRef<str>) -> Option<&mut Bson> {
        self.inner.get_mut(key.as_ref())
    }

    /// Get a floating point value for this key if it exists and has the
    /// correct type.
    pub fn get_f64(&self, key: impl AsRef<str>) -> ValueAccessResult<f64> {
        self.typed_get(key, Bson::as_f64)
    }

    /// Get a string slice for this key if it exists and has the correct type.
    pub fn get_str(&self, key: impl AsRef<str>) -> ValueAccessResult<&str> {
        match self.get(key) {
            Some(Bson::String(s)) => Ok(s.as_str()),
            Some(_) => Err(ValueAccessError::UnexpectedType),
            None => Err(ValueAccessError::NotPresent),
        }
    }

    /// Get an i32 value for this key if it exists and has the correct type.
    pub fn get_i32(&self, key: impl AsRef<str>) -> ValueAccessResult<i32> {
        self.typed_get(key, Bson::as_i32)
    }

    /// Get an i64 value for this key if it exists and has the correct type.
    pub fn get_i64(&self, key: impl AsRef<str>) -> ValueAccessResult<i64> {
        self.typed_get(key, Bson::as_i64)
    }

    /// Get a boolean value for this key if it exists and has the correct type.
    pub fn get_bool(&self, key: impl AsRef<str>) -> ValueAccessResult<bool> {
        self.typed_get(key, Bson::as_bool)
    }

    /// Get a reference to an array for this key if it exists and has the
    /// correct type.
    pub fn get_array(&self, key: impl AsRef<str>) -> ValueAccessResult<&Array> {
        match self.get(key) {
            Some(Bson::Array(a)) => Ok(a),
            Some(_) => Err(ValueAccessError::UnexpectedType),
            None => Err(ValueAccessError::NotPresent),
        }
    }

    /// Get a reference to an embedded document for this key if it exists and
    /// has the correct type.
    pub fn get_document(&self, key: impl AsRef<str>) -> ValueAccessResult<&Document> {
        match self.get(key) {
            Some(Bson::Document(d)) => Ok(d),
            Some(_) => Err(ValueAccessError::UnexpectedType),
            None => Err(ValueAccessError::NotPresent),
        }
    }

    /// Get an object id value for this key if it exists and has the correct
    /// type.
    pub fn get_object_id(&self, key: impl AsRef<str>) -> ValueAccessResult<ObjectId> {
        self.typed_get(key, Bson::as_object_id)
    }

    /// Get a generic binary value for this key if it exists and has the
    /// correct type.
    pub fn get_binary_generic(&self, key: impl AsRef<str>) -> ValueAccessResult<&Vec<u8>> {
        match self.get(key) {
            Some(Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            })) => Ok(bytes),
            Some(_) => Err(ValueAccessError::UnexpectedType),
            None => Err(ValueAccessError::NotPresent),
        }
    }

    /// Get a datetime value for this key if it exists and has the correct
    /// type.
    pub fn get_datetime(&self, key: impl AsRef<str>) -> ValueAccessResult<DateTime> {
        match self.get(key) {
            Some(Bson::DateTime(dt)) => Ok(*dt),
            Some(_) => Err(ValueAccessError::UnexpectedType),
            None => Err(ValueAccessError::NotPresent),
        }
    }

    /// Get a timestamp value for this key if it exists and has the correct
    /// type.
    pub fn get_timestamp(&self, key: impl AsRef<str>) -> ValueAccessResult<Timestamp> {
        self.typed_get(key, Bson::as_timestamp)
    }

    fn typed_get<T>(
        &self,
        key: impl AsRef<str>,
        f: impl FnOnce(&Bson) -> Option<T>,
    ) -> ValueAccessResult<T> {
        match self.get(key) {
            Some(value) => f(value).ok_or(ValueAccessError::UnexpectedType),
            None => Err(ValueAccessError::NotPresent),
        }
    }

    /// Returns true if the map contains a value for the specified key.
    pub fn contains_key(&self, key: impl AsRef<str>) -> bool {
        self.inner.contains_key(key.as_ref())
    }

    /// Gets a collection of all keys in the document, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    /// Gets a collection of all values in the document, in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.inner.values()
    }

    /// Returns the number of elements in the document.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the document contains no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sets the value of the entry with the `key`, appending it if absent.
    /// Returns the previous value, if the key was already present.
    pub fn insert(&mut self, key: impl Into<String>, val: impl Into<Bson>) -> Option<Bson> {
        self.inner.insert(key.into(), val.into())
    }

    /// Removes the value for `key`, preserving the order of the remaining
    /// entries. Returns the removed value, if any.
    pub fn remove(&mut self, key: impl AsRef<str>) -> Option<Bson> {
        self.inner.shift_remove(key.as_ref())
    }

    /// Attempts to serialize the `Document` into a byte stream.
    pub fn to_writer<W: Write>(&self, mut writer: W) -> ser::Result<()> {
        let buf = self.to_vec()?;
        writer.write_all(&buf).map_err(ser::Error::Io)?;
        Ok(())
    }

    /// Serialize the `Document` to bytes.
    pub fn to_vec(&self) -> ser::Result<Vec<u8>> {
        let mut buf = Vec::new();
        ser::write_document(&mut buf, self)?;
        Ok(buf)
    }

    /// The encoded size of this document in bytes.
    pub(crate) fn encoded_len(&self) -> ser::Result<usize> {
        Ok(self.to_vec()?.len())
    }

    /// Attempts to deserialize a `Document` from a byte stream.
    pub fn from_reader<R: Read>(mut reader: R) -> de::Result<Document> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).map_err(de::Error::Io)?;
        let len = i32::from_le_bytes(len_bytes);
        if len < 5 {
            return Err(de::Error::invalid_length(len));
        }
        let mut buf = vec![0u8; len as usize];
        buf[..4].copy_from_slice(&len_bytes);
        reader.read_exact(&mut buf[4..]).map_err(de::Error::Io)?;

        let mut slice = buf.as_slice();
        let doc = de::read_document(&mut slice)?;
        if !slice.is_empty() {
            return Err(de::Error::trailing_bytes());
        }
        Ok(doc)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " \"{}\": {}", k, v)?;
        }
        f.write_str(" }")
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = indexmap::map::IntoIter<String, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Bson);
    type IntoIter = indexmap::map::Iter<'a, String, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for Document {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl<K: Into<String>, V: Into<Bson>> Extend<(K, V)> for Document {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl From<std::collections::HashMap<String, Bson>> for Document {
    /// Builds a `Document` from an unordered mapping. The resulting entry
    /// order is unspecified.
    fn from(map: std::collections::HashMap<String, Bson>) -> Self {
        map.into_iter().collect()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Bson::deserialize(deserializer)? {
            Bson::Document(doc) => Ok(doc),
            other => Err(serde::de::Error::custom(format!(
                "expected Document, found {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::doc;

    #[test]
    fn retains_insertion_order() {
        let doc = doc! { "last_name": 1, "first_name": 1, "_id": 1 };
        let keys: Vec<_> = doc.keys().cloned().collect();
        assert_eq!(keys, vec!["last_name", "first_name", "_id"]);
    }

    #[test]
    fn insert_overwrites_in_place() {
        let mut doc = doc! { "a": 1, "b": 2 };
        doc.insert("a", 3);
        let entries: Vec<_> = doc.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(entries[0], ("a".to_string(), Bson::Int32(3)));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn typed_accessors() {
        let id = ObjectId::new();
        let doc = doc! { "s": "str", "i": 42, "l": 42i64, "b": true, "oid": id };
        assert_eq!(doc.get_str("s"), Ok("str"));
        assert_eq!(doc.get_i32("i"), Ok(42));
        assert_eq!(doc.get_i64("l"), Ok(42));
        assert_eq!(doc.get_bool("b"), Ok(true));
        assert_eq!(doc.get_object_id("oid"), Ok(id));
        assert_eq!(doc.get_str("i"), Err(ValueAccessError::UnexpectedType));
        assert_eq!(doc.get_str("missing"), Err(ValueAccessError::NotPresent));
    }
}
