//! Timestamps and UTC calendar keys.
//!
//! Protocol timestamps ([`UnixTimestamp`]) are seconds since the epoch,
//! serialized as stringified integers so JavaScript consumers do not lose
//! precision. Usage counters and budget windows run on UTC calendar keys
//! (`YYYY-MM-DD` days, `YYYY-MM` months) derived from millisecond clocks.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::ops::Add;
use std::time::SystemTime;

/// Seconds since the Unix epoch, serialized as a stringified integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Current system time.
    ///
    /// Panics only if the system clock predates the Unix epoch.
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_secs();
        Self(now)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0 * 1000
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0 + rhs)
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

/// Milliseconds since the Unix epoch, for stored documents.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime before UNIX epoch?!?")
        .as_millis() as u64
}

fn utc(millis: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis as i64).unwrap_or_default()
}

/// UTC calendar day key, `YYYY-MM-DD`. Day boundaries are UTC midnight.
pub fn day_key(millis: u64) -> String {
    utc(millis).format("%Y-%m-%d").to_string()
}

/// UTC calendar month key, `YYYY-MM`.
pub fn month_key(millis: u64) -> String {
    utc(millis).format("%Y-%m").to_string()
}

/// Start of the UTC day containing `millis`, in milliseconds.
pub fn day_start_millis(millis: u64) -> u64 {
    let dt = utc(millis);
    let day = dt
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    day.and_utc().timestamp_millis() as u64
}

/// Start of the UTC month containing `millis`, in milliseconds.
pub fn month_start_millis(millis: u64) -> u64 {
    let dt = utc(millis);
    let first = dt
        .date_naive()
        .with_day(1)
        .expect("day 1 is valid")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    first.and_utc().timestamp_millis() as u64
}

/// ISO-8601 rendering of a millisecond timestamp (webhook header format).
pub fn iso8601(millis: u64) -> String {
    utc(millis).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-03-15T17:45:30Z
    const SAMPLE_MILLIS: u64 = 1_773_596_730_000;

    #[test]
    fn day_and_month_keys() {
        assert_eq!(day_key(SAMPLE_MILLIS), "2026-03-15");
        assert_eq!(month_key(SAMPLE_MILLIS), "2026-03");
    }

    #[test]
    fn day_rolls_over_at_utc_midnight() {
        let start = day_start_millis(SAMPLE_MILLIS);
        assert_eq!(day_key(start), "2026-03-15");
        assert_eq!(day_key(start - 1), "2026-03-14");
        assert_eq!(day_key(start + 24 * 3600 * 1000), "2026-03-16");
    }

    #[test]
    fn month_start_is_first_day() {
        let start = month_start_millis(SAMPLE_MILLIS);
        assert_eq!(day_key(start), "2026-03-01");
    }

    #[test]
    fn unix_timestamp_string_roundtrip() {
        let ts = UnixTimestamp::from_secs(1_800_000_000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1800000000\"");
        let back: UnixTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
