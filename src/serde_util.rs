//! Small serialization helpers shared by the options structs.

use std::time::Duration;

use serde::Serializer;

/// Serializes a `Duration` as an integer number of milliseconds, the unit
/// the server expects for every `...MS` command field.
pub(crate) fn serialize_duration_option_as_int_millis<S: Serializer>(
    val: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match val {
        Some(duration) => {
            serializer.serialize_i64(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
        }
        None => serializer.serialize_none(),
    }
}

/// Serializes a `u32` as an `i32`, saturating at the maximum. BSON has no
/// unsigned types.
pub(crate) fn serialize_u32_option_as_i32<S: Serializer>(
    val: &Option<u32>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match val {
        Some(value) => serializer.serialize_i32(i32::try_from(*value).unwrap_or(i32::MAX)),
        None => serializer.serialize_none(),
    }
}

/// Serializes a `u64` as an `i64`, saturating at the maximum.
pub(crate) fn serialize_u64_option_as_i64<S: Serializer>(
    val: &Option<u64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match val {
        Some(value) => serializer.serialize_i64(i64::try_from(*value).unwrap_or(i64::MAX)),
        None => serializer.serialize_none(),
    }
}
