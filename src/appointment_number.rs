use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

/// Human-readable appointment number, `APT-<YYYYMMDD>-<id padded to 5>`.
///
/// Written once into `appointments.appointment_num` when the row is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentNumber(String);

impl AppointmentNumber {
    pub fn new(booked_on: NaiveDate, appointment_id: i64) -> Self {
        Self(format!("APT-{}-{:05}", booked_on.format("%Y%m%d"), appointment_id))
    }

    /// Recovers the row id from a number. Older numbers only guarantee that
    /// the id is the last dash-separated segment.
    pub fn parse_id(raw: &str) -> Option<i64> {
        let raw = raw.trim();
        if !raw.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("APT-")) {
            return None;
        }
        raw.rsplit('-')
            .next()
            .and_then(|tail| tail.parse::<i64>().ok())
            .filter(|id| *id > 0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AppointmentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How callers point at an appointment: the numeric id or its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppointmentRef(pub i64);

impl AppointmentRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Some(AppointmentRef(id)),
            Ok(_) => None,
            Err(_) => AppointmentNumber::parse_id(raw).map(AppointmentRef),
        }
    }
}

impl<'de> Deserialize<'de> for AppointmentRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(i64),
            Text(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Num(id) if id > 0 => Some(AppointmentRef(id)),
            Raw::Num(_) => None,
            Raw::Text(s) => AppointmentRef::parse(&s),
        };
        parsed.ok_or_else(|| serde::de::Error::custom("invalid appointment_id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_format_pads_id() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(AppointmentNumber::new(day, 42).as_str(), "APT-20261019-00042");
        assert_eq!(AppointmentNumber::new(day, 1234567).as_str(), "APT-20261019-1234567");
    }

    #[test]
    fn test_parse_id_takes_last_segment() {
        assert_eq!(AppointmentNumber::parse_id("APT-20261019-00042"), Some(42));
        assert_eq!(AppointmentNumber::parse_id("apt-20250101-7"), Some(7));
        assert_eq!(AppointmentNumber::parse_id("APT-20261019-00000"), None);
        assert_eq!(AppointmentNumber::parse_id("REF-20261019-00042"), None);
        assert_eq!(AppointmentNumber::parse_id("APT-20261019-x"), None);
        assert_eq!(AppointmentNumber::parse_id("42"), None);
    }

    #[test]
    fn test_ref_accepts_id_or_number() {
        assert_eq!(AppointmentRef::parse("15"), Some(AppointmentRef(15)));
        assert_eq!(AppointmentRef::parse("APT-20261019-00015"), Some(AppointmentRef(15)));
        assert_eq!(AppointmentRef::parse("-3"), None);
        assert_eq!(AppointmentRef::parse(""), None);
    }

    #[test]
    fn test_ref_deserializes_from_json_number_or_string() {
        let a: AppointmentRef = serde_json::from_str("9").unwrap();
        let b: AppointmentRef = serde_json::from_str("\"9\"").unwrap();
        let c: AppointmentRef = serde_json::from_str("\"APT-20261019-00009\"").unwrap();
        assert_eq!(a, AppointmentRef(9));
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(serde_json::from_str::<AppointmentRef>("0").is_err());
    }
}
