//! [BSON Decimal128](https://github.com/mongodb/specifications/blob/master/source/bson-decimal128/decimal128.md) data type representation

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Bson;

/// Decimal exponent bias per IEEE 754-2008.
const EXPONENT_BIAS: i64 = 6176;
/// Smallest unbiased exponent.
const EXPONENT_MIN: i64 = -6176;
/// Largest unbiased exponent.
const EXPONENT_MAX: i64 = 6111;
/// Maximum number of decimal digits in the coefficient.
const COEFFICIENT_DIGITS: usize = 34;
/// Largest canonical 113-bit coefficient: 10^34 - 1.
const COEFFICIENT_MAX: u128 = 9_999_999_999_999_999_999_999_999_999_999_999;

/// Struct representing a 128-bit IEEE 754-2008 decimal floating point value.
///
/// The bytes are held in the little-endian binary integer decimal (BID) wire
/// order, so round-tripping any value through the codec is bit-exact.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Decimal128 {
    bytes: [u8; 16],
}

/// The interpretation of the 17-bit combination field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Class {
    Finite,
    Infinity,
    QuietNan,
    SignalingNan,
}

impl Decimal128 {
    /// Constructs a new `Decimal128` from the provided raw byte representation
    /// as it appears on the wire.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Returns the raw byte representation of this `Decimal128`.
    pub const fn bytes(&self) -> [u8; 16] {
        self.bytes
    }

    fn from_parts(negative: bool, exponent: i64, coefficient: u128) -> Self {
        let sign = if negative { 1u128 << 127 } else { 0 };
        let biased = (exponent + EXPONENT_BIAS) as u128;
        Self {
            bytes: (sign | (biased << 113) | coefficient).to_le_bytes(),
        }
    }

    fn bits(&self) -> u128 {
        u128::from_le_bytes(self.bytes)
    }

    fn is_negative(&self) -> bool {
        self.bits() >> 127 == 1
    }

    pub(crate) fn classify(&self) -> Class {
        let bits = self.bits();
        match (bits >> 122) & 0b11111 {
            0b11111 => {
                if (bits >> 121) & 1 == 1 {
                    Class::SignalingNan
                } else {
                    Class::QuietNan
                }
            }
            0b11110 => Class::Infinity,
            _ => Class::Finite,
        }
    }

    /// The unbiased exponent and coefficient of a finite value. Non-canonical
    /// coefficients (those exceeding 34 decimal digits) are read as zero, per
    /// IEEE 754-2008.
    fn finite_parts(&self) -> (i64, u128) {
        let bits = self.bits();
        let (biased, coefficient) = if (bits >> 125) & 0b11 == 0b11 {
            // The "11" combination prefix implies a coefficient with the high
            // bit of its 113-bit field set, which is always > 10^34 - 1.
            ((bits >> 111) & 0x3FFF, (1u128 << 113) | (bits & ((1 << 111) - 1)))
        } else {
            ((bits >> 113) & 0x3FFF, bits & ((1 << 113) - 1))
        };

        let coefficient = if coefficient > COEFFICIENT_MAX {
            0
        } else {
            coefficient
        };
        (biased as i64 - EXPONENT_BIAS, coefficient)
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Decimal128({})", self)
    }
}

impl fmt::Display for Decimal128 {
    /// Renders the value with the IEEE 754-2008 "to scientific string"
    /// algorithm.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.classify() {
            Class::QuietNan | Class::SignalingNan => return f.write_str("NaN"),
            Class::Infinity => {
                return if self.is_negative() {
                    f.write_str("-Infinity")
                } else {
                    f.write_str("Infinity")
                };
            }
            Class::Finite => {}
        }

        if self.is_negative() {
            f.write_str("-")?;
        }

        let (exponent, coefficient) = self.finite_parts();
        let digits = coefficient.to_string();
        let adjusted = exponent + digits.len() as i64 - 1;

        if exponent > 0 || adjusted < -6 {
            // scientific notation
            f.write_str(&digits[..1])?;
            if digits.len() > 1 {
                write!(f, ".{}", &digits[1..])?;
            }
            write!(f, "E{:+}", adjusted)
        } else if exponent == 0 {
            f.write_str(&digits)
        } else {
            let point = digits.len() as i64 + exponent;
            if point > 0 {
                let (int_part, frac_part) = digits.split_at(point as usize);
                write!(f, "{}.{}", int_part, frac_part)
            } else {
                write!(f, "0.{}{}", "0".repeat(-point as usize), digits)
            }
        }
    }
}

/// An error returned when parsing a [`Decimal128`] from a string fails.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The string was not a valid decimal number.
    #[error("invalid Decimal128 string: {0:?}")]
    InvalidString(String),

    /// The exponent was outside the representable range after clamping.
    #[error("Decimal128 exponent out of range: {0:?}")]
    ExponentOutOfRange(String),

    /// The coefficient had more than 34 significant digits.
    #[error("Decimal128 coefficient exceeds 34 significant digits: {0:?}")]
    Unrepresentable(String),
}

impl FromStr for Decimal128 {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let original = s;
        let invalid = || ParseError::InvalidString(original.to_string());

        let (negative, s) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        match s.to_ascii_lowercase().as_str() {
            "nan" => {
                let mut bytes = [0u8; 16];
                bytes[15] = if negative { 0xFC } else { 0x7C };
                return Ok(Self::from_bytes(bytes));
            }
            "inf" | "infinity" => {
                let mut bytes = [0u8; 16];
                bytes[15] = if negative { 0xF8 } else { 0x78 };
                return Ok(Self::from_bytes(bytes));
            }
            _ => {}
        }

        let (mantissa, exp_str) = match s.find(['e', 'E']) {
            Some(i) => (&s[..i], Some(&s[i + 1..])),
            None => (s, None),
        };
        let mut exponent: i64 = match exp_str {
            Some(e) => e.parse().map_err(|_| invalid())?,
            None => 0,
        };

        let (int_part, frac_part) = match mantissa.find('.') {
            Some(i) => (&mantissa[..i], &mantissa[i + 1..]),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        exponent -= frac_part.len() as i64;
        let mut digits: String = format!("{}{}", int_part, frac_part);
        // normalize away leading zeros; the value 0 keeps one digit
        let trimmed = digits.trim_start_matches('0');
        digits = if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        };

        // drop excess trailing zeros that would overflow the coefficient
        while digits.len() > COEFFICIENT_DIGITS && digits.ends_with('0') {
            digits.pop();
            exponent += 1;
        }
        if digits.len() > COEFFICIENT_DIGITS {
            return Err(ParseError::Unrepresentable(original.to_string()));
        }

        let mut coefficient: u128 = digits.parse().map_err(|_| invalid())?;

        // clamp the exponent into range where exact adjustment is possible
        while exponent > EXPONENT_MAX && coefficient <= COEFFICIENT_MAX / 10 {
            coefficient *= 10;
            exponent -= 1;
        }
        while exponent < EXPONENT_MIN && coefficient % 10 == 0 && coefficient != 0 {
            coefficient /= 10;
            exponent += 1;
        }
        if coefficient == 0 {
            exponent = exponent.clamp(EXPONENT_MIN, EXPONENT_MAX);
        }
        if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
            return Err(ParseError::ExponentOutOfRange(original.to_string()));
        }

        Ok(Self::from_parts(negative, exponent, coefficient))
    }
}

impl From<Decimal128> for Bson {
    fn from(d: Decimal128) -> Self {
        Bson::Decimal128(d)
    }
}

impl Serialize for Decimal128 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_map(Some(1))?;
        serde::ser::SerializeMap::serialize_entry(
            &mut state,
            "$numberDecimalBytes",
            &hex::encode(self.bytes),
        )?;
        serde::ser::SerializeMap::end(state)
    }
}

impl<'de> Deserialize<'de> for Decimal128 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Bson::deserialize(deserializer)? {
            Bson::Decimal128(d) => Ok(d),
            other => Err(serde::de::Error::custom(format!(
                "expected Decimal128, found {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Decimal128 {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_render() {
        assert_eq!(parse("0").to_string(), "0");
        assert_eq!(parse("-0").to_string(), "-0");
        assert_eq!(parse("1.5").to_string(), "1.5");
        assert_eq!(parse("0.001").to_string(), "0.001");
        assert_eq!(parse("12345678901234567").to_string(), "12345678901234567");
        assert_eq!(parse("1E+3").to_string(), "1E+3");
        assert_eq!(parse("1e-7").to_string(), "1E-7");
        assert_eq!(parse("0.000001").to_string(), "0.000001");
    }

    #[test]
    fn specials() {
        assert_eq!(parse("NaN").classify(), Class::QuietNan);
        assert_eq!(parse("Infinity").to_string(), "Infinity");
        assert_eq!(parse("-Inf").to_string(), "-Infinity");
        assert_eq!(parse("Infinity").classify(), Class::Infinity);
    }

    #[test]
    fn bit_exact_round_trip() {
        for s in ["1.5", "-7.000", "9.999999999999999999999999999999999E+6144", "0"] {
            let d = parse(s);
            assert_eq!(Decimal128::from_bytes(d.bytes()), d);
        }
    }

    #[test]
    fn exponent_clamping() {
        // representable by padding zeros
        assert_eq!(
            parse("1E+6144").to_string(),
            format!("1.{}E+6144", "0".repeat(33))
        );
        // unrepresentable exponents are rejected
        assert!(matches!(
            "1E99999".parse::<Decimal128>(),
            Err(ParseError::ExponentOutOfRange(_))
        ));
        assert!(matches!(
            "1E-99999".parse::<Decimal128>(),
            Err(ParseError::ExponentOutOfRange(_))
        ));
    }

    #[test]
    fn coefficient_limits() {
        let max = "9".repeat(34);
        assert_eq!(parse(&max).to_string(), max);
        assert!(matches!(
            format!("{}9", max).parse::<Decimal128>(),
            Err(ParseError::Unrepresentable(_))
        ));
    }

    #[test]
    fn nan_infinity_bit_patterns() {
        // sign = 0, combination = 11111 -> quiet NaN
        let mut bytes = [0u8; 16];
        bytes[15] = 0x7C;
        assert_eq!(Decimal128::from_bytes(bytes).classify(), Class::QuietNan);
        bytes[15] = 0x7E;
        assert_eq!(
            Decimal128::from_bytes(bytes).classify(),
            Class::SignalingNan
        );
        bytes[15] = 0x78;
        assert_eq!(Decimal128::from_bytes(bytes).classify(), Class::Infinity);
    }
}
