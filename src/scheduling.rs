//! Booking calendar rules: the half-hour slot grid, date/time parsing in the
//! clinic's local time, and the per-slot ceiling.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::error::AppointmentError;

pub const DAY_START_HOUR: u32 = 8;
pub const DAY_END_HOUR: u32 = 16;
pub const SLOT_MINUTES: i64 = 30;

/// Slot start times from 08:00 through 15:30.
pub fn slot_grid() -> Vec<NaiveTime> {
    let mut out = Vec::new();
    let Some(mut t) = NaiveTime::from_hms_opt(DAY_START_HOUR, 0, 0) else {
        return out;
    };
    while t.hour() < DAY_END_HOUR {
        out.push(t);
        t += Duration::minutes(SLOT_MINUTES);
    }
    out
}

pub fn is_on_grid(t: NaiveTime) -> bool {
    t.second() == 0
        && t.nanosecond() == 0
        && (DAY_START_HOUR..DAY_END_HOUR).contains(&t.hour())
        && i64::from(t.minute()) % SLOT_MINUTES == 0
}

pub fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, AppointmentError> {
    let raw = raw.trim();
    // chrono accepts unpadded fields; the form contract is strict YYYY-MM-DD.
    if raw.len() != 10 {
        return Err(AppointmentError::Validation(format!("{field} must be YYYY-MM-DD")));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppointmentError::Validation(format!("{field} must be YYYY-MM-DD")))
}

/// Accepts `HH:MM` and the `HH:MM:SS` the browser sometimes posts.
pub fn parse_time(raw: &str, field: &str) -> Result<NaiveTime, AppointmentError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| AppointmentError::Validation(format!("{field} must be HH:MM")))
}

pub fn format_slot(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn local_now(offset: FixedOffset, now: DateTime<Utc>) -> NaiveDateTime {
    now.with_timezone(&offset).naive_local()
}

pub fn local_today(offset: FixedOffset, now: DateTime<Utc>) -> NaiveDate {
    local_now(offset, now).date()
}

/// Bookable dates start tomorrow.
pub fn ensure_future_date(
    date: NaiveDate,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Result<(), AppointmentError> {
    if date <= local_today(offset, now) {
        return Err(AppointmentError::Validation(
            "Appointment date must be in the future".into(),
        ));
    }
    Ok(())
}

pub fn ensure_bookable_time(time: NaiveTime) -> Result<(), AppointmentError> {
    if !is_on_grid(time) {
        return Err(AppointmentError::Validation(format!(
            "Appointment time must be a half-hour slot between {DAY_START_HOUR:02}:00 and {DAY_END_HOUR:02}:00"
        )));
    }
    Ok(())
}

/// Whether the local date+time is still ahead of `now`.
pub fn is_in_future(
    date: NaiveDate,
    time: NaiveTime,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> bool {
    date.and_time(time) > local_now(offset, now)
}

pub fn slot_has_room(booked: i64, capacity: i64) -> bool {
    booked < capacity
}

/// Per-slot counts over the whole grid; slots with no bookings report 0.
/// Counts for off-grid times found in the data are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAvailability {
    pub counts: BTreeMap<String, i64>,
    pub capacity: i64,
}

impl SlotAvailability {
    pub fn from_counts(rows: impl IntoIterator<Item = (NaiveTime, i64)>, capacity: i64) -> Self {
        let mut counts: BTreeMap<String, i64> =
            slot_grid().into_iter().map(|t| (format_slot(t), 0)).collect();
        for (time, n) in rows {
            *counts.entry(format_slot(time)).or_insert(0) += n;
        }
        Self { counts, capacity }
    }

    pub fn is_available(&self, slot: &str) -> bool {
        slot_has_room(self.counts.get(slot).copied().unwrap_or(0), self.capacity)
    }

    pub fn full_slots(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|(_, n)| !slot_has_room(**n, self.capacity))
            .map(|(slot, _)| slot.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manila() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_slot_grid_covers_8_to_4() {
        let grid = slot_grid();
        assert_eq!(grid.len(), 16);
        assert_eq!(grid.first(), Some(&t(8, 0)));
        assert_eq!(grid.last(), Some(&t(15, 30)));
    }

    #[test]
    fn test_is_on_grid() {
        assert!(is_on_grid(t(9, 0)));
        assert!(is_on_grid(t(15, 30)));
        assert!(!is_on_grid(t(9, 15)));
        assert!(!is_on_grid(t(7, 30)));
        assert!(!is_on_grid(t(16, 0)));
    }

    #[test]
    fn test_parse_date_strict() {
        assert!(parse_date("2026-10-20", "date").is_ok());
        assert!(parse_date("2026-1-2", "date").is_err());
        assert!(parse_date("20/10/2026", "date").is_err());
        assert!(parse_date("2026-02-30", "date").is_err());
    }

    #[test]
    fn test_parse_time_variants() {
        assert_eq!(parse_time("09:00", "time").unwrap(), t(9, 0));
        assert_eq!(parse_time("09:30:00", "time").unwrap(), t(9, 30));
        assert!(parse_time("9am", "time").is_err());
    }

    #[test]
    fn test_future_date_uses_clinic_offset() {
        // 2026-10-19 17:00 UTC is already 2026-10-20 01:00 in Koronadal.
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 17, 0, 0).unwrap();
        let oct20 = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let oct21 = NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
        assert!(ensure_future_date(oct20, manila(), now).is_err());
        assert!(ensure_future_date(oct21, manila(), now).is_ok());
    }

    #[test]
    fn test_is_in_future_compares_date_and_time() {
        // 01:00 UTC == 09:00 local
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 1, 0, 0).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert!(is_in_future(today, t(9, 30), manila(), now));
        assert!(!is_in_future(today, t(9, 0), manila(), now));
        assert!(!is_in_future(today, t(8, 0), manila(), now));
    }

    #[test]
    fn test_capacity_boundary() {
        assert!(slot_has_room(19, 20));
        assert!(!slot_has_room(20, 20));
        assert!(!slot_has_room(21, 20));
    }

    #[test]
    fn test_availability_fills_grid_and_reports_full_slots() {
        let avail = SlotAvailability::from_counts(vec![(t(9, 0), 20), (t(9, 30), 19)], 20);
        assert_eq!(avail.counts.len(), 16);
        assert_eq!(avail.counts["08:00"], 0);
        assert!(!avail.is_available("09:00"));
        assert!(avail.is_available("09:30"));
        assert!(avail.is_available("10:00"));
        assert_eq!(avail.full_slots(), vec!["09:00".to_string()]);
    }
}
