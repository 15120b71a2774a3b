//! Timestamp helpers. Every timestamp on the wire is ISO-8601 in UTC with
//! millisecond precision (`2024-01-01T08:00:00.000Z`), the shape browsers
//! produce, so records written by either side read back identically.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Current time truncated to whole milliseconds.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn to_iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_iso(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// `#[serde(with = "iso_millis")]` for required timestamps.
pub mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_iso(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_iso(&raw).map_err(serde::de::Error::custom)
    }

    /// Optional timestamps serialize as `null` when absent.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match ts {
                Some(ts) => serializer.serialize_str(&crate::timefmt::to_iso(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw.as_deref() {
                None | Some("") => Ok(None),
                Some(value) => crate::timefmt::parse_iso(value)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test_timeout::timeout]
    fn formats_with_millis_and_z_suffix() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        assert_eq!(to_iso(&ts), "2024-01-01T08:00:00.000Z");
    }

    #[test_timeout::timeout]
    fn parses_offsets_into_utc() {
        let parsed = parse_iso("2024-01-01T10:00:00.250+02:00").unwrap();
        assert_eq!(to_iso(&parsed), "2024-01-01T08:00:00.250Z");
    }

    #[test_timeout::timeout]
    fn now_has_no_sub_millisecond_component() {
        let now = now_millis();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
