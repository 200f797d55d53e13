use serde::de::{
    self,
    DeserializeSeed,
    Deserializer as _,
    EnumAccess,
    IntoDeserializer,
    MapAccess,
    SeqAccess,
    VariantAccess,
    Visitor,
};

use super::{BsonVisitor, Error, Result};
use crate::bson::{doc, Bson, Document};

/// Deserializer over an owned [`Bson`] value tree.
#[derive(Debug)]
pub struct Deserializer {
    value: Bson,
}

impl Deserializer {
    /// Construct a new `Deserializer` over the given value.
    pub fn new(value: Bson) -> Deserializer {
        Deserializer { value }
    }
}

/// The single-key marker form of the non-serde-native types; the inverse of
/// `Bson::from_extended_document`.
fn extended_document(value: &Bson) -> Option<Document> {
    Some(match value {
        Bson::ObjectId(oid) => doc! { "$oid": oid.to_hex() },
        Bson::DateTime(dt) => doc! { "$date": dt.timestamp_millis() },
        Bson::Timestamp(ts) => {
            let combined = (u64::from(ts.time) << 32) | u64::from(ts.increment);
            doc! { "$timestamp": combined as i64 }
        }
        Bson::Binary(b) => doc! {
            "$binaryBase64": crate::bson::base64_encode(&b.bytes),
            "$binarySubtype": i32::from(u8::from(b.subtype)),
        },
        Bson::Decimal128(d) => doc! { "$numberDecimalBytes": hex::encode(d.bytes()) },
        Bson::RegularExpression(r) => doc! {
            "$regularExpression": { "pattern": r.pattern.clone(), "options": r.options.clone() },
        },
        Bson::JavaScriptCode(c) => doc! { "$code": c.clone() },
        Bson::JavaScriptCodeWithScope(c) => {
            doc! { "$code": c.code.clone(), "$scope": c.scope.clone() }
        }
        Bson::Symbol(s) => doc! { "$symbol": s.clone() },
        Bson::DbPointer(p) => doc! {
            "$dbPointer": { "$ref": p.namespace.clone(), "$id": p.id },
        },
        Bson::MinKey => doc! { "$minKey": 1 },
        Bson::MaxKey => doc! { "$maxKey": 1 },
        Bson::Undefined => doc! { "$undefined": true },
        _ => return None,
    })
}

impl<'de> de::Deserializer<'de> for Deserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Double(v) => visitor.visit_f64(v),
            Bson::String(v) => visitor.visit_string(v),
            Bson::Array(v) => visitor.visit_seq(SeqDeserializer {
                iter: v.into_iter(),
            }),
            Bson::Document(v) => visitor.visit_map(MapDeserializer {
                iter: v.into_iter(),
                value: None,
            }),
            Bson::Boolean(v) => visitor.visit_bool(v),
            Bson::Null => visitor.visit_unit(),
            Bson::Int32(v) => visitor.visit_i32(v),
            Bson::Int64(v) => visitor.visit_i64(v),
            other => {
                // the remaining types surface through their marker form so
                // that `BsonVisitor` can reassemble them
                let doc = extended_document(&other)
                    .unwrap_or_default();
                visitor.visit_map(MapDeserializer {
                    iter: doc.into_iter(),
                    value: None,
                })
            }
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Bson::String(s) => visitor.visit_enum(EnumDeserializer {
                variant: s,
                value: None,
            }),
            Bson::Document(doc) => {
                let mut iter = doc.into_iter();
                let (variant, value) = match iter.next() {
                    Some(entry) => entry,
                    None => {
                        return Err(de::Error::custom(
                            "expected an enum as a single-entry document, got an empty one",
                        ));
                    }
                };
                if iter.next().is_some() {
                    return Err(de::Error::custom(
                        "expected an enum as a single-entry document, got extra entries",
                    ));
                }
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: Some(value),
                })
            }
            other => Err(de::Error::custom(format!(
                "expected an enum, got {:?}",
                other
            ))),
        }
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Binary(b) => visitor.visit_byte_buf(b.bytes),
            Bson::String(s) => visitor.visit_string(s),
            other => Deserializer::new(other).deserialize_any(visitor),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 u8 u16 u32 u64 f32 f64 char str string unit
        unit_struct seq tuple tuple_struct map struct identifier ignored_any
    }
}

struct SeqDeserializer {
    iter: std::vec::IntoIter<Bson>,
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: indexmap::map::IntoIter<String, Bson>,
    value: Option<Bson>,
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key.into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let value = self.value.take().ok_or_else(|| {
            de::Error::custom("next_value_seed called before next_key_seed")
        })?;
        seed.deserialize(Deserializer::new(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumDeserializer {
    variant: String,
    value: Option<Bson>,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = Error;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant)> {
        let variant = seed.deserialize(self.variant.into_deserializer())?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Option<Bson>,
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        match self.value {
            None => Ok(()),
            Some(value) => Err(de::Error::custom(format!(
                "expected a unit variant, got {:?}",
                value
            ))),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        match self.value {
            Some(value) => seed.deserialize(Deserializer::new(value)),
            None => Err(de::Error::custom("expected a newtype variant, got none")),
        }
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        match self.value {
            Some(value) => Deserializer::new(value).deserialize_any(visitor),
            None => Err(de::Error::custom("expected a tuple variant, got none")),
        }
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Some(value) => Deserializer::new(value).deserialize_any(visitor),
            None => Err(de::Error::custom("expected a struct variant, got none")),
        }
    }
}
