//! Time sources and timestamp handling for metadata expiry checks
//!
//! Expiry enforcement is only as good as the clock it consults, so the
//! refresh path never calls `SystemTime::now()` directly. It goes through a
//! [`TimeSource`] so tests can replay refreshes at a chosen instant and
//! repository fixtures can be built in the past or future deterministically.
//!
//! Metadata carries absolute expiry timestamps in RFC 3339 UTC form
//! (`YYYY-MM-DDTHH:MM:SSZ`). [`parse_timestamp`] and [`format_timestamp`]
//! round-trip that form with second precision; fractional seconds are
//! accepted on input and ignored.

use crate::error::TrustError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Build timestamp set at compile time.
///
/// Unix timestamp (seconds since 1970-01-01) of when the library was
/// compiled. Any clock reading earlier than this is definitely wrong: the
/// binary cannot run before it was built. Used as a sanity floor when
/// evaluating expiry, since a clock reset to the epoch would otherwise make
/// every expired document look fresh.
pub const BUILD_TIMESTAMP: u64 = {
    // Parsed from the environment variable set by build.rs; const fn is
    // limited, so the digits are folded by hand.
    match option_env!("UPSEAL_BUILD_TIMESTAMP") {
        Some(s) => {
            let bytes = s.as_bytes();
            let mut result: u64 = 0;
            let mut i = 0;
            while i < bytes.len() {
                let digit = bytes[i] as u64 - b'0' as u64;
                result = result * 10 + digit;
                i += 1;
            }
            result
        }
        // Fallback: 2025-01-01 00:00:00 UTC
        None => 1735689600,
    }
};

/// Pluggable clock for expiry checks.
///
/// # Implementors
///
/// - [`SystemTimeSource`]: wall clock (default)
/// - [`FixedTimeSource`]: a pinned instant, for tests and replay
pub trait TimeSource: Send + Sync {
    /// Current time from this source.
    fn now(&self) -> Result<SystemTime, TrustError>;

    /// Current time as a Unix timestamp (seconds since the epoch).
    fn now_unix(&self) -> Result<u64, TrustError> {
        let time = self.now()?;
        Ok(time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs())
    }
}

/// Wall-clock time source using `std::time::SystemTime`.
///
/// Warns (but does not fail) when the clock reads earlier than the build
/// timestamp, which indicates a reset or badly skewed clock. Callers still
/// get the raw reading; the warning exists so an operator can explain a
/// surprising expiry verdict afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Result<SystemTime, TrustError> {
        let now = SystemTime::now();
        if let Ok(secs) = now.duration_since(UNIX_EPOCH) {
            if secs.as_secs() < BUILD_TIMESTAMP {
                log::warn!(
                    "System clock reads {} which is before the build timestamp {}; expiry checks may be unreliable",
                    secs.as_secs(),
                    BUILD_TIMESTAMP
                );
            }
        }
        Ok(now)
    }
}

/// Fixed time source for tests and deterministic replay.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    timestamp: SystemTime,
}

impl FixedTimeSource {
    /// Create from a Unix timestamp (seconds since 1970-01-01 00:00:00 UTC).
    pub fn from_unix_secs(secs: u64) -> Self {
        Self {
            timestamp: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Result<SystemTime, TrustError> {
        Ok(self.timestamp)
    }
}

/// Parse an RFC 3339 timestamp to Unix seconds.
///
/// Supports the forms metadata actually carries:
/// - `2026-01-15T12:30:45Z` (UTC)
/// - `2026-01-15T12:30:45.123456Z` (fractional seconds, ignored)
/// - `1755907200` (Unix seconds as a bare string)
pub fn parse_timestamp(timestamp: &str) -> Result<u64, TrustError> {
    if let Ok(secs) = timestamp.parse::<u64>() {
        return Ok(secs);
    }

    let timestamp = timestamp.trim();

    // The expiry string arrives in fetched metadata, so byte 19 need not be
    // a char boundary; such input is never a valid stamp.
    let head = timestamp.get(..19).filter(|_| timestamp.ends_with('Z'));
    if let Some(head) = head {
        let parts: Vec<&str> = head.split(|c| c == '-' || c == 'T' || c == ':').collect();
        if parts.len() == 6 {
            let year: i32 = parts[0]
                .parse()
                .map_err(|_| TrustError::TimeError("Invalid year".into()))?;
            let month: u32 = parts[1]
                .parse()
                .map_err(|_| TrustError::TimeError("Invalid month".into()))?;
            let day: u32 = parts[2]
                .parse()
                .map_err(|_| TrustError::TimeError("Invalid day".into()))?;
            let hour: u32 = parts[3]
                .parse()
                .map_err(|_| TrustError::TimeError("Invalid hour".into()))?;
            let minute: u32 = parts[4]
                .parse()
                .map_err(|_| TrustError::TimeError("Invalid minute".into()))?;
            let second: u32 = parts[5]
                .parse()
                .map_err(|_| TrustError::TimeError("Invalid second".into()))?;

            if hour > 23 || minute > 59 || second > 60 {
                return Err(TrustError::TimeError("Invalid time of day".into()));
            }

            let days = days_since_epoch(year, month, day)?;
            let secs = (days as u64) * 86400
                + (hour as u64) * 3600
                + (minute as u64) * 60
                + (second as u64);
            return Ok(secs);
        }
    }

    Err(TrustError::TimeError(format!(
        "Cannot parse timestamp: '{}'",
        timestamp
    )))
}

/// Format Unix seconds as an RFC 3339 UTC timestamp (`YYYY-MM-DDTHH:MM:SSZ`).
///
/// Exact inverse of [`parse_timestamp`] for whole-second inputs; the
/// repository builder relies on that round-trip when stamping `expires`.
pub fn format_timestamp(secs: u64) -> String {
    let days = (secs / 86400) as i64;
    let rem = secs % 86400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

// Month lengths in a non-leap year.
const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Days since the Unix epoch (1970-01-01) for a civil date.
///
/// Accurate for 1970-2100, which comfortably covers every expiry horizon
/// this crate issues.
fn days_since_epoch(year: i32, month: u32, day: u32) -> Result<i64, TrustError> {
    if year < 1970 {
        return Err(TrustError::TimeError("Year before 1970".into()));
    }
    if !(1..=12).contains(&month) {
        return Err(TrustError::TimeError("Invalid month".into()));
    }
    let month_len = if month == 2 && is_leap_year(year) {
        29
    } else {
        DAYS_IN_MONTH[(month - 1) as usize]
    };
    if !(1..=month_len).contains(&day) {
        return Err(TrustError::TimeError("Invalid day".into()));
    }

    let mut days: i64 = 0;

    for y in 1970..year {
        days += if is_leap_year(y) { 366 } else { 365 };
    }

    for m in 1..month {
        days += DAYS_IN_MONTH[(m - 1) as usize] as i64;
        if m == 2 && is_leap_year(year) {
            days += 1;
        }
    }

    days += (day - 1) as i64;

    Ok(days)
}

/// Civil date for a day count since the Unix epoch. Inverse of
/// [`days_since_epoch`] over the same 1970-2100 window.
fn civil_from_days(mut days: i64) -> (i32, u32, u32) {
    let mut year = 1970i32;
    loop {
        let len = if is_leap_year(year) { 366 } else { 365 };
        if days < len {
            break;
        }
        days -= len;
        year += 1;
    }

    let mut month = 1u32;
    loop {
        let mut len = DAYS_IN_MONTH[(month - 1) as usize] as i64;
        if month == 2 && is_leap_year(year) {
            len += 1;
        }
        if days < len {
            break;
        }
        days -= len;
        month += 1;
    }

    (year, month, (days + 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_timestamp_is_reasonable() {
        // After 2025-01-01, before 2100-01-01
        assert!(BUILD_TIMESTAMP >= 1735689600);
        assert!(BUILD_TIMESTAMP < 4102444800);
    }

    #[test]
    fn test_system_time_source() {
        let source = SystemTimeSource;
        let now = source.now_unix().unwrap();
        assert!(now > 0);
    }

    #[test]
    fn test_fixed_time_source() {
        let source = FixedTimeSource::from_unix_secs(1704067200);
        assert_eq!(source.now_unix().unwrap(), 1704067200);
    }

    #[test]
    fn test_parse_timestamp_unix() {
        assert_eq!(parse_timestamp("1704067200").unwrap(), 1704067200);
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        // 2024-01-01 00:00:00 UTC
        assert_eq!(parse_timestamp("2024-01-01T00:00:00Z").unwrap(), 1704067200);

        // 2024-01-15 12:30:45 UTC
        let expected = 1704067200 + 14 * 86400 + 12 * 3600 + 30 * 60 + 45;
        assert_eq!(parse_timestamp("2024-01-15T12:30:45Z").unwrap(), expected);
    }

    #[test]
    fn test_parse_timestamp_fractional_seconds() {
        assert_eq!(
            parse_timestamp("2024-01-01T00:00:00.123456Z").unwrap(),
            1704067200
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("not a timestamp").is_err());
        assert!(parse_timestamp("2024-01-01").is_err());
        assert!(parse_timestamp("2024-01-01T99:00:00Z").is_err());
    }

    #[test]
    fn test_parse_timestamp_rejects_impossible_dates() {
        assert!(parse_timestamp("2026-02-31T00:00:00Z").is_err());
        assert!(parse_timestamp("2026-04-31T00:00:00Z").is_err());
        assert!(parse_timestamp("2025-02-29T00:00:00Z").is_err());
        // 2024 is a leap year
        assert_eq!(parse_timestamp("2024-02-29T00:00:00Z").unwrap(), 1709164800);
    }

    #[test]
    fn test_parse_timestamp_rejects_multibyte_characters() {
        // 'é' spans bytes 18-19, so the date-time part cannot be sliced off.
        assert!(parse_timestamp("2026-01-15T12:30:4éZ").is_err());
        assert!(parse_timestamp("20é6-01-15T12:30:45Z").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(1704067200), "2024-01-01T00:00:00Z");
        // Leap day
        assert_eq!(format_timestamp(1709164800), "2024-02-29T00:00:00Z");
        assert_eq!(
            format_timestamp(1704067200 + 14 * 86400 + 12 * 3600 + 30 * 60 + 45),
            "2024-01-15T12:30:45Z"
        );
    }

    #[test]
    fn test_timestamp_round_trip() {
        for secs in [
            0u64,
            1704067200,
            1709164800,
            1735689600,
            1893456000, // 2030-01-01
            2524608000, // 2050-01-01
        ] {
            let formatted = format_timestamp(secs);
            assert_eq!(parse_timestamp(&formatted).unwrap(), secs, "{}", formatted);
        }
    }

    #[test]
    fn test_days_since_epoch() {
        assert_eq!(days_since_epoch(1970, 1, 1).unwrap(), 0);
        assert_eq!(days_since_epoch(1970, 1, 2).unwrap(), 1);
        // 2024-01-01 = 1704067200 / 86400
        assert_eq!(days_since_epoch(2024, 1, 1).unwrap(), 19723);
    }

    #[test]
    fn test_civil_from_days_inverts_days_since_epoch() {
        for &(y, m, d) in &[
            (1970, 1, 1),
            (1999, 12, 31),
            (2024, 2, 29),
            (2026, 8, 22),
            (2099, 6, 15),
        ] {
            let days = days_since_epoch(y, m, d).unwrap();
            assert_eq!(civil_from_days(days), (y, m, d));
        }
    }
}
