//! JSON encoding policy
//!
//! Values that JSON cannot carry losslessly leave the server as strings:
//! timestamps are ISO-8601 text in UTC, and integers outside the range a
//! double represents exactly are quoted. Use these modules through
//! `#[serde(with = "...")]` on response fields.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Largest integer every JSON consumer decodes exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Render `dt` as `YYYY-MM-DDTHH:MM:SS.ffffff` (UTC, no offset suffix).
pub fn iso8601(dt: &DateTime<Utc>) -> String {
    dt.naive_utc().format(ISO_FORMAT).to_string()
}

/// Parse text produced by [`iso8601`]. An explicit offset is also accepted.
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Ok(naive.and_utc()),
        Err(_) => DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)),
    }
}

/// `DateTime<Utc>` as ISO-8601 text.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::iso8601(dt))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_iso8601(&s).map_err(de::Error::custom)
    }
}

/// `i64` as a JSON number when it is exactly representable, else a string.
pub mod safe_int {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(n: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if n.unsigned_abs() <= super::MAX_SAFE_INTEGER as u64 {
            serializer.serialize_i64(*n)
        } else {
            serializer.collect_str(n)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => Ok(n),
            NumberOrString::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "safe_int")]
        num: i64,
        #[serde(with = "timestamp")]
        at: DateTime<Utc>,
    }

    #[test]
    fn iso8601_has_microseconds_and_no_offset() {
        let dt = Utc.with_ymd_and_hms(2017, 5, 1, 12, 30, 5).unwrap() + Duration::microseconds(42);
        assert_eq!(iso8601(&dt), "2017-05-01T12:30:05.000042");
        assert_eq!(parse_iso8601("2017-05-01T12:30:05.000042").unwrap(), dt);
    }

    #[test]
    fn rfc3339_input_is_accepted() {
        let dt = parse_iso8601("2017-05-01T12:30:05+02:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2017, 5, 1, 10, 30, 5).unwrap());
    }

    #[test]
    fn large_integers_are_quoted() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let small = serde_json::to_value(Sample { num: 995, at }).unwrap();
        assert_eq!(small["num"], 995);
        assert_eq!(small["at"], "2020-01-01T00:00:00.000000");

        let big = serde_json::to_value(Sample { num: MAX_SAFE_INTEGER + 1, at }).unwrap();
        assert_eq!(big["num"], "9007199254740992");

        let back: Sample = serde_json::from_value(big).unwrap();
        assert_eq!(back.num, MAX_SAFE_INTEGER + 1);
    }
}
