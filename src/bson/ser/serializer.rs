use serde::ser::{self, Serialize};

use super::{Error, Result};
use crate::bson::{spec::BinarySubtype, Array, Binary, Bson, Document};

/// Serializer whose output is a [`Bson`] value tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct Serializer;

impl Serializer {
    /// Construct a new `Serializer`.
    pub fn new() -> Serializer {
        Serializer
    }
}

impl ser::Serializer for Serializer {
    type Ok = Bson;
    type Error = Error;

    type SerializeSeq = ArraySerializer;
    type SerializeTuple = ArraySerializer;
    type SerializeTupleStruct = ArraySerializer;
    type SerializeTupleVariant = TupleVariantSerializer;
    type SerializeMap = DocumentSerializer;
    type SerializeStruct = DocumentSerializer;
    type SerializeStructVariant = StructVariantSerializer;

    #[inline]
    fn serialize_bool(self, value: bool) -> Result<Bson> {
        Ok(Bson::Boolean(value))
    }

    #[inline]
    fn serialize_i8(self, value: i8) -> Result<Bson> {
        Ok(Bson::Int32(value.into()))
    }

    #[inline]
    fn serialize_i16(self, value: i16) -> Result<Bson> {
        Ok(Bson::Int32(value.into()))
    }

    #[inline]
    fn serialize_i32(self, value: i32) -> Result<Bson> {
        Ok(Bson::Int32(value))
    }

    #[inline]
    fn serialize_i64(self, value: i64) -> Result<Bson> {
        Ok(Bson::Int64(value))
    }

    #[inline]
    fn serialize_u8(self, value: u8) -> Result<Bson> {
        Ok(Bson::Int32(value.into()))
    }

    #[inline]
    fn serialize_u16(self, value: u16) -> Result<Bson> {
        Ok(Bson::Int32(value.into()))
    }

    #[inline]
    fn serialize_u32(self, value: u32) -> Result<Bson> {
        Ok(Bson::from(value))
    }

    #[inline]
    fn serialize_u64(self, value: u64) -> Result<Bson> {
        match i64::try_from(value) {
            Ok(v) => Ok(Bson::Int64(v)),
            Err(_) => Err(Error::UnsignedIntegerExceededRange(value)),
        }
    }

    #[inline]
    fn serialize_f32(self, value: f32) -> Result<Bson> {
        Ok(Bson::Double(value.into()))
    }

    #[inline]
    fn serialize_f64(self, value: f64) -> Result<Bson> {
        Ok(Bson::Double(value))
    }

    #[inline]
    fn serialize_char(self, value: char) -> Result<Bson> {
        Ok(Bson::String(value.to_string()))
    }

    #[inline]
    fn serialize_str(self, value: &str) -> Result<Bson> {
        Ok(Bson::String(value.to_string()))
    }

    fn serialize_bytes(self, value: &[u8]) -> Result<Bson> {
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: value.to_vec(),
        }))
    }

    #[inline]
    fn serialize_none(self) -> Result<Bson> {
        self.serialize_unit()
    }

    #[inline]
    fn serialize_some<V: Serialize + ?Sized>(self, value: &V) -> Result<Bson> {
        value.serialize(self)
    }

    #[inline]
    fn serialize_unit(self) -> Result<Bson> {
        Ok(Bson::Null)
    }

    #[inline]
    fn serialize_unit_struct(self, _name: &'static str) -> Result<Bson> {
        self.serialize_unit()
    }

    #[inline]
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Bson> {
        Ok(Bson::String(variant.to_string()))
    }

    #[inline]
    fn serialize_newtype_struct<V: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &V,
    ) -> Result<Bson> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<V: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &V,
    ) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(variant, value.serialize(self)?);
        Ok(Bson::Document(doc))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq> {
        Ok(ArraySerializer {
            inner: Array::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Ok(TupleVariantSerializer {
            inner: Array::with_capacity(len),
            name: variant,
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Ok(DocumentSerializer {
            inner: Document::new(),
            next_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Ok(DocumentSerializer {
            inner: Document::new(),
            next_key: None,
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Ok(StructVariantSerializer {
            inner: Document::new(),
            name: variant,
        })
    }
}

pub struct ArraySerializer {
    inner: Array,
}

impl ser::SerializeSeq for ArraySerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.inner.push(value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        Ok(Bson::Array(self.inner))
    }
}

impl ser::SerializeTuple for ArraySerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Bson> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for ArraySerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Bson> {
        ser::SerializeSeq::end(self)
    }
}

pub struct TupleVariantSerializer {
    inner: Array,
    name: &'static str,
}

impl ser::SerializeTupleVariant for TupleVariantSerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.inner.push(value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(self.name, Bson::Array(self.inner));
        Ok(Bson::Document(doc))
    }
}

pub struct DocumentSerializer {
    inner: Document,
    next_key: Option<String>,
}

impl ser::SerializeMap for DocumentSerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        match key.serialize(Serializer)? {
            Bson::String(s) => {
                self.next_key = Some(s);
                Ok(())
            }
            other => Err(Error::InvalidDocumentKey {
                key: format!("{:?}", other),
            }),
        }
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = self.next_key.take().unwrap_or_default();
        self.inner.insert(key, value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        // single-key marker maps produced by the Serialize impls of the
        // non-serde-native BSON types fold back into their value form here
        Ok(Bson::from_extended_document(self.inner))
    }
}

impl ser::SerializeStruct for DocumentSerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.inner.insert(key, value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        Ok(Bson::from_extended_document(self.inner))
    }
}

pub struct StructVariantSerializer {
    inner: Document,
    name: &'static str,
}

impl ser::SerializeStructVariant for StructVariantSerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.inner.insert(key, value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(self.name, Bson::Document(self.inner));
        Ok(Bson::Document(doc))
    }
}
