use std::sync::OnceLock;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use tracing::warn;

use crate::error::{ApuError, Result};

/// Default zone used to attribute readings to a day and hour.
pub const DEFAULT_REFERENCE_TIMEZONE: &str = "Europe/Rome";

// ── System timezone detection ─────────────────────────────────────────────────

/// Detect the IANA timezone name of the running system.
///
/// Falls back to `"UTC"` if detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

/// Resolve the `"auto"` sentinel to the system zone; other names pass through.
pub fn resolve_timezone_name(name: &str) -> String {
    if name.eq_ignore_ascii_case("auto") {
        get_system_timezone()
    } else {
        name.to_string()
    }
}

// ── TimezoneHandler ───────────────────────────────────────────────────────────

/// Converts instants to calendar fields and parses zone-less timestamps.
#[derive(Debug, Clone, Copy)]
pub struct TimezoneHandler {
    tz: Tz,
}

impl TimezoneHandler {
    /// Build a handler for the IANA zone `tz_name` (`"auto"` = system zone).
    pub fn new(tz_name: &str) -> Result<Self> {
        let resolved = resolve_timezone_name(tz_name);
        let tz = resolved
            .parse::<Tz>()
            .map_err(|_| ApuError::InvalidTimezone(resolved.clone()))?;
        Ok(Self { tz })
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Day of month (1-31) and hour (0-23) of `ts` in this zone.
    pub fn calendar_slot(&self, ts: DateTime<Utc>) -> (u32, u32) {
        let local = ts.with_timezone(&self.tz);
        (local.day(), local.hour())
    }

    /// Parse a timestamp string into UTC.
    ///
    /// Strings carrying an offset (RFC 3339, `Z` suffix) are taken as-is;
    /// naive strings are interpreted in this handler's zone. An ambiguous
    /// local time (DST fall-back) resolves to the earlier instant.
    pub fn parse_timestamp(&self, s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }

        const FMTS: &[&str] = &[
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M",
        ];
        for fmt in FMTS {
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
                return self
                    .tz
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc));
            }
        }

        warn!("TimezoneHandler: could not parse timestamp \"{}\"", s);
        None
    }
}

// ── Durations ─────────────────────────────────────────────────────────────────

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*(ms|s|m|h)?\s*$").expect("regex is valid"))
}

/// Parse `"500ms"`, `"60s"`, `"2m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<TimeDelta> {
    let lowered = s.to_lowercase();
    let cap = duration_regex()
        .captures(&lowered)
        .ok_or_else(|| ApuError::InvalidDuration(s.to_string()))?;
    let amount: i64 = cap[1]
        .parse()
        .map_err(|_| ApuError::InvalidDuration(s.to_string()))?;
    let delta = match cap.get(2).map(|m| m.as_str()) {
        Some("ms") => TimeDelta::try_milliseconds(amount),
        Some("m") => TimeDelta::try_minutes(amount),
        Some("h") => TimeDelta::try_hours(amount),
        _ => TimeDelta::try_seconds(amount),
    };
    delta.ok_or_else(|| ApuError::InvalidDuration(s.to_string()))
}

// ── Date ranges ───────────────────────────────────────────────────────────────

/// Parse a range bound: `YYYY-MM-DD` (midnight UTC) or RFC 3339.
pub fn parse_date_bound(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| ApuError::TimestampParse(s.to_string()))
}

/// Half-open `[start, end)` window; either side may be unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Err(ApuError::Config(format!(
                    "range start {} is not before end {}",
                    s.to_rfc3339(),
                    e.to_rfc3339()
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// The calendar month `YYYY-MM`, in UTC.
    pub fn month(ym: &str) -> Result<Self> {
        let first = NaiveDate::parse_from_str(&format!("{}-01", ym.trim()), "%Y-%m-%d")
            .map_err(|_| ApuError::TimestampParse(ym.to_string()))?;
        let next = first
            .checked_add_months(chrono::Months::new(1))
            .ok_or_else(|| ApuError::TimestampParse(ym.to_string()))?;
        let to_utc = |d: NaiveDate| {
            d.and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| ApuError::TimestampParse(ym.to_string()))
        };
        Self::new(Some(to_utc(first)?), Some(to_utc(next)?))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Human-readable label, e.g. `"2020-02-01 .. 2020-03-01"`.
    pub fn label(&self) -> String {
        let fmt = |b: Option<DateTime<Utc>>| {
            b.map(|t| {
                if t.time() == chrono::NaiveTime::MIN {
                    t.format("%Y-%m-%d").to_string()
                } else {
                    t.to_rfc3339()
                }
            })
        };
        match (fmt(self.start), fmt(self.end)) {
            (None, None) => "all readings".to_string(),
            (Some(s), None) => format!("from {}", s),
            (None, Some(e)) => format!("until {}", e),
            (Some(s), Some(e)) => format!("{} .. {}", s, e),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_invalid_timezone_is_error() {
        let err = TimezoneHandler::new("Invalid/Zone").unwrap_err();
        assert!(matches!(err, ApuError::InvalidTimezone(ref z) if z == "Invalid/Zone"));
    }

    #[test]
    fn test_new_auto_resolves_to_system_zone() {
        // The system zone may not parse on exotic hosts; just make sure "auto"
        // is never passed through literally.
        if let Err(ApuError::InvalidTimezone(name)) = TimezoneHandler::new("auto") {
            assert_ne!(name, "auto");
        }
    }

    #[test]
    fn test_calendar_slot_in_rome() {
        let handler = TimezoneHandler::new("Europe/Rome").unwrap();
        // 23:30 UTC in winter is 00:30 next day in Rome (UTC+1).
        let ts = Utc.with_ymd_and_hms(2020, 2, 4, 23, 30, 0).unwrap();
        assert_eq!(handler.calendar_slot(ts), (5, 0));
    }

    #[test]
    fn test_calendar_slot_in_summer() {
        let handler = TimezoneHandler::new("Europe/Rome").unwrap();
        // UTC+2 in July.
        let ts = Utc.with_ymd_and_hms(2020, 7, 1, 8, 15, 0).unwrap();
        assert_eq!(handler.calendar_slot(ts), (1, 10));
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let handler = TimezoneHandler::new("Europe/Rome").unwrap();
        let dt = handler.parse_timestamp("2020-02-01T12:00:00+02:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2020, 2, 1, 10, 0, 0).unwrap());
        let z = handler.parse_timestamp("2020-02-01T12:00:00Z").unwrap();
        assert_eq!(z.hour(), 12);
    }

    #[test]
    fn test_parse_timestamp_naive_uses_handler_zone() {
        let utc = TimezoneHandler::new("UTC").unwrap();
        let dt = utc.parse_timestamp("2020-02-01 00:00:10").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 10).unwrap());

        let rome = TimezoneHandler::new("Europe/Rome").unwrap();
        let dt = rome.parse_timestamp("2020-02-01 01:00:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_timestamp_fractional_seconds() {
        let utc = TimezoneHandler::new("UTC").unwrap();
        let dt = utc.parse_timestamp("2020-02-01T00:00:10.500").unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_parse_timestamp_garbage() {
        let utc = TimezoneHandler::new("UTC").unwrap();
        assert!(utc.parse_timestamp("").is_none());
        assert!(utc.parse_timestamp("not-a-date").is_none());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("60s").unwrap(), TimeDelta::seconds(60));
        assert_eq!(parse_duration("60").unwrap(), TimeDelta::seconds(60));
        assert_eq!(parse_duration("2m").unwrap(), TimeDelta::minutes(2));
        assert_eq!(parse_duration("1H").unwrap(), TimeDelta::hours(1));
        assert_eq!(parse_duration("500ms").unwrap(), TimeDelta::milliseconds(500));
        assert_eq!(parse_duration(" 0s ").unwrap(), TimeDelta::zero());
    }

    #[test]
    fn test_parse_duration_is_case_insensitive() {
        assert_eq!(parse_duration("90S").unwrap(), TimeDelta::seconds(90));
        assert_eq!(parse_duration("250MS").unwrap(), TimeDelta::milliseconds(250));
        assert_eq!(parse_duration(" 3M ").unwrap(), TimeDelta::minutes(3));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("1.5m").is_err());
        assert!(parse_duration("10 days").is_err());
    }

    #[test]
    fn test_parse_date_bound() {
        assert_eq!(
            parse_date_bound("2020-02-01").unwrap(),
            Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date_bound("2020-02-01T06:00:00+01:00").unwrap(),
            Utc.with_ymd_and_hms(2020, 2, 1, 5, 0, 0).unwrap()
        );
        assert!(parse_date_bound("Feb 2020").is_err());
    }

    #[test]
    fn test_month_range_february_leap_year() {
        let range = DateRange::month("2020-02").unwrap();
        assert_eq!(range.start, Some(Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2020, 2, 29, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.label(), "2020-02-01 .. 2020-03-01");
    }

    #[test]
    fn test_month_range_december_rolls_over() {
        let range = DateRange::month("2020-12").unwrap();
        assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_date_range_rejects_inverted_bounds() {
        let a = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap();
        assert!(DateRange::new(Some(a), Some(b)).is_err());
        assert!(DateRange::new(Some(a), Some(a)).is_err());
    }

    #[test]
    fn test_unbounded_range_contains_everything() {
        let range = DateRange::default();
        assert!(range.is_unbounded());
        assert!(range.contains(Utc::now()));
        assert_eq!(range.label(), "all readings");
    }
}
