//! Module containing functionality related to BSON UTC datetimes.

use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Bson;

/// A BSON UTC datetime: a signed count of milliseconds since the Unix epoch.
///
/// Values decoded from the wire are clamped to the range
/// `0000-9999-01-01T00:00:00Z..=9999-12-31T23:59:59.999Z` so that they can
/// always be rendered as a calendar date.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DateTime(i64);

/// Days from the Unix epoch to `y-m-d` in the proleptic Gregorian calendar.
const fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

impl DateTime {
    /// The earliest representable datetime: `-9999-01-01T00:00:00Z`.
    pub const MIN: DateTime = DateTime(days_from_civil(-9999, 1, 1) * MILLIS_PER_DAY);

    /// The latest representable datetime: `9999-12-31T23:59:59.999Z`.
    pub const MAX: DateTime =
        DateTime(days_from_civil(9999, 12, 31) * MILLIS_PER_DAY + MILLIS_PER_DAY - 1);

    /// The current system time.
    pub fn now() -> DateTime {
        Self::from_system_time(SystemTime::now())
    }

    /// Makes a new `DateTime` from the number of milliseconds since the Unix
    /// epoch.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the number of milliseconds since the Unix epoch.
    pub const fn timestamp_millis(self) -> i64 {
        self.0
    }

    /// Clamp this datetime into the representable calendar range. Applied to
    /// every value decoded from the wire.
    pub(crate) fn clamped(self) -> Self {
        Self(self.0.clamp(Self::MIN.0, Self::MAX.0))
    }

    /// Convert the given `SystemTime` to a `DateTime`, truncating
    /// sub-millisecond precision.
    pub fn from_system_time(st: SystemTime) -> Self {
        match st.duration_since(UNIX_EPOCH) {
            Ok(d) => Self(i64::try_from(d.as_millis()).unwrap_or(i64::MAX)),
            // handle SystemTime from before the Unix epoch
            Err(e) => {
                let millis = i64::try_from(e.duration().as_millis()).unwrap_or(i64::MAX);
                Self(-millis)
            }
        }
    }

    /// Convert this `DateTime` to a `SystemTime`.
    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= 0 {
            UNIX_EPOCH + Duration::from_millis(self.0 as u64)
        } else {
            UNIX_EPOCH - Duration::from_millis(self.0.unsigned_abs())
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let clamped = self.clamped().0;
        let (days, mut millis) = (
            clamped.div_euclid(MILLIS_PER_DAY),
            clamped.rem_euclid(MILLIS_PER_DAY),
        );

        // civil_from_days, the inverse of days_from_civil
        let z = days + 719468;
        let era = if z >= 0 { z } else { z - 146096 } / 146097;
        let doe = z - era * 146097;
        let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
        let y = yoe + era * 400;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let d = doy - (153 * mp + 2) / 5 + 1;
        let m = if mp < 10 { mp + 3 } else { mp - 9 };
        let y = if m <= 2 { y + 1 } else { y };

        let ms = millis % 1000;
        millis /= 1000;
        let (s, min, h) = (millis % 60, (millis / 60) % 60, millis / 3600);

        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
            y, m, d, h, min, s, ms
        )
    }
}

impl From<SystemTime> for DateTime {
    fn from(st: SystemTime) -> Self {
        Self::from_system_time(st)
    }
}

impl From<DateTime> for Bson {
    fn from(dt: DateTime) -> Self {
        Bson::DateTime(dt)
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_map(Some(1))?;
        serde::ser::SerializeMap::serialize_entry(&mut state, "$date", &self.0)?;
        serde::ser::SerializeMap::end(state)
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Bson::deserialize(deserializer)? {
            Bson::DateTime(dt) => Ok(dt),
            other => Err(serde::de::Error::custom(format!(
                "expected DateTime, found {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_bounds() {
        assert_eq!(DateTime::from_millis(i64::MIN).clamped(), DateTime::MIN);
        assert_eq!(DateTime::from_millis(i64::MAX).clamped(), DateTime::MAX);
        let in_range = DateTime::from_millis(1_500_000_000_000);
        assert_eq!(in_range.clamped(), in_range);
    }

    #[test]
    fn renders_rfc3339() {
        assert_eq!(
            DateTime::from_millis(0).to_string(),
            "1970-01-01T00:00:00.000Z"
        );
        assert_eq!(
            DateTime::from_millis(1_356_351_330_500).to_string(),
            "2012-12-24T12:15:30.500Z"
        );
        assert_eq!(DateTime::MAX.to_string(), "9999-12-31T23:59:59.999Z");
    }

    #[test]
    fn system_time_round_trip() {
        let dt = DateTime::from_millis(1_700_000_000_123);
        assert_eq!(DateTime::from_system_time(dt.to_system_time()), dt);
    }
}
