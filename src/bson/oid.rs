//! Module containing functionality related to BSON ObjectIds.

use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU32, Ordering},
        LazyLock,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::{random, rng, Rng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Bson;

const TIMESTAMP_SIZE: usize = 4;
const PROCESS_ID_SIZE: usize = 5;
const COUNTER_SIZE: usize = 3;

const TIMESTAMP_OFFSET: usize = 0;
const PROCESS_ID_OFFSET: usize = TIMESTAMP_OFFSET + TIMESTAMP_SIZE;
const COUNTER_OFFSET: usize = PROCESS_ID_OFFSET + PROCESS_ID_SIZE;

const MAX_U24: u32 = 0xFF_FFFF;

/// Random value unique to this process, generated lazily on first use.
static PROCESS_UNIQUE: LazyLock<[u8; PROCESS_ID_SIZE]> = LazyLock::new(random);

/// Monotonically increasing counter, seeded randomly and wrapping at 2^24.
static OID_COUNTER: LazyLock<AtomicU32> =
    LazyLock::new(|| AtomicU32::new(rng().random_range(0..=MAX_U24)));

const HEX_ENCODE: &[u8; 16] = b"0123456789abcdef";

const HEX_DECODE: [u8; 256] = {
    let mut table = [0xFFu8; 256];
    let mut i = 0u8;
    while i < 10 {
        table[(b'0' + i) as usize] = i;
        i += 1;
    }
    let mut i = 0u8;
    while i < 6 {
        table[(b'a' + i) as usize] = 10 + i;
        table[(b'A' + i) as usize] = 10 + i;
        i += 1;
    }
    table
};

/// An error returned when parsing an [`ObjectId`] from a string fails.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The provided string was not 24 characters long.
    #[error("invalid ObjectId length: expected 24 hex characters, got {length}")]
    InvalidLength {
        /// The length of the provided string.
        length: usize,
    },

    /// The provided string contained a non-hex character.
    #[error("invalid hex character in ObjectId: {c:?}")]
    InvalidHexCharacter {
        /// The offending character.
        c: char,
    },
}

/// A wrapper around a raw 12-byte ObjectId.
///
/// The layout is a 4-byte big-endian seconds-since-epoch timestamp, a 5-byte
/// per-process random value, and a 3-byte counter that wraps on overflow.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectId {
    id: [u8; 12],
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectId {
    /// Generates a new [`ObjectId`], represented in bytes.
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as u32;

        let counter = OID_COUNTER.fetch_add(1, Ordering::SeqCst) & MAX_U24;

        let mut buf = [0u8; 12];
        buf[TIMESTAMP_OFFSET..PROCESS_ID_OFFSET].copy_from_slice(&timestamp.to_be_bytes());
        buf[PROCESS_ID_OFFSET..COUNTER_OFFSET].copy_from_slice(&*PROCESS_UNIQUE);
        buf[COUNTER_OFFSET..].copy_from_slice(&counter.to_be_bytes()[1..]);

        Self { id: buf }
    }

    /// Constructs a new ObjectId wrapper around the raw byte representation.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self { id: bytes }
    }

    /// Returns the raw byte representation of this ObjectId.
    pub const fn bytes(&self) -> [u8; 12] {
        self.id
    }

    /// The number of seconds since the Unix epoch at which this ObjectId was
    /// generated, taken from its leading four bytes.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.id[0], self.id[1], self.id[2], self.id[3]])
    }

    /// Convert this ObjectId to its lowercase hexadecimal representation.
    pub fn to_hex(self) -> String {
        let mut out = [0u8; 24];
        for (i, byte) in self.id.iter().enumerate() {
            out[i * 2] = HEX_ENCODE[(byte >> 4) as usize];
            out[i * 2 + 1] = HEX_ENCODE[(byte & 0x0F) as usize];
        }
        // only ASCII hex characters were written above
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Convert a hexadecimal string to an ObjectId. Both uppercase and
    /// lowercase hex digits are accepted.
    pub fn parse_str(s: impl AsRef<str>) -> Result<Self, Error> {
        let s = s.as_ref();
        if s.len() != 24 {
            return Err(Error::InvalidLength { length: s.len() });
        }

        let bytes = s.as_bytes();
        let mut id = [0u8; 12];
        for i in 0..12 {
            let hi = HEX_DECODE[bytes[i * 2] as usize];
            let lo = HEX_DECODE[bytes[i * 2 + 1] as usize];
            if hi == 0xFF {
                return Err(Error::InvalidHexCharacter {
                    c: bytes[i * 2] as char,
                });
            }
            if lo == 0xFF {
                return Err(Error::InvalidHexCharacter {
                    c: bytes[i * 2 + 1] as char,
                });
            }
            id[i] = (hi << 4) | lo;
        }

        Ok(Self { id })
    }
}

impl From<[u8; 12]> for ObjectId {
    fn from(bytes: [u8; 12]) -> Self {
        Self { id: bytes }
    }
}

impl From<ObjectId> for Bson {
    fn from(id: ObjectId) -> Self {
        Bson::ObjectId(id)
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ObjectId").field(&self.to_hex()).finish()
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_map(Some(1))?;
        serde::ser::SerializeMap::serialize_entry(&mut state, "$oid", &self.to_hex())?;
        serde::ser::SerializeMap::end(state)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Bson::deserialize(deserializer)? {
            Bson::ObjectId(oid) => Ok(oid),
            Bson::String(s) => ObjectId::parse_str(&s).map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "expected ObjectId, found {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_hex() {
        let id = ObjectId::parse_str("1d2045f46577e41c3d1815d7").unwrap();
        assert_eq!(
            id.bytes(),
            [0x1d, 0x20, 0x45, 0xf4, 0x65, 0x77, 0xe4, 0x1c, 0x3d, 0x18, 0x15, 0xd7]
        );
        assert_eq!(id.to_hex(), "1d2045f46577e41c3d1815d7");
    }

    #[test]
    fn accepts_uppercase_hex() {
        let lower = ObjectId::parse_str("1d2045f46577e41c3d1815d7").unwrap();
        let upper = ObjectId::parse_str("1D2045F46577E41C3D1815D7").unwrap();
        assert_eq!(lower, upper);
        // encoding always emits lowercase
        assert_eq!(upper.to_hex(), "1d2045f46577e41c3d1815d7");
    }

    #[test]
    fn timestamp_from_leading_bytes() {
        let id = ObjectId::parse_str("1d2045f46577e41c3d1815d7").unwrap();
        assert_eq!(id.timestamp(), 488654324);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            ObjectId::parse_str("abc"),
            Err(Error::InvalidLength { length: 3 })
        ));
        assert!(matches!(
            ObjectId::parse_str("zd2045f46577e41c3d1815d7"),
            Err(Error::InvalidHexCharacter { c: 'z' })
        ));
    }

    #[test]
    fn generated_ids_are_unique() {
        let mut ids: Vec<_> = (0..1000).map(|_| ObjectId::new()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn counter_increments_between_calls() {
        let a = ObjectId::new().bytes();
        let b = ObjectId::new().bytes();
        let counter = |id: [u8; 12]| u32::from_be_bytes([0, id[9], id[10], id[11]]);
        assert_eq!(counter(b), (counter(a) + 1) & super::MAX_U24);
    }
}
