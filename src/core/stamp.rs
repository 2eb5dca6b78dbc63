//! Boundary Stamps
//!
//! Free-form wall-clock stamps trailing announcement and result frames,
//! e.g. `2025-07-01 19:49:56`, `2025-06-11 18:41:03.621055+05:30` or
//! `2025-07-01T19:49:56Z`. Sub-second precision is discarded and any offset is
//! applied so the result is a whole-second UTC instant.
//!
//! A stamp without an offset is taken to be UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use super::period::CodecError;

/// Parse a stamp given as a single token (`DATE` `T` `TIME`).
pub fn parse_stamp(token: &str) -> Result<DateTime<Utc>, CodecError> {
    match token.split_once(['T', 't']) {
        Some((date, time)) => parse_stamp_parts(date, time),
        None => Err(malformed(token)),
    }
}

/// Parse a stamp given as separate date and time tokens.
pub fn parse_stamp_parts(date: &str, time: &str) -> Result<DateTime<Utc>, CodecError> {
    let whole = || malformed(&format!("{date} {time}"));

    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| whole())?;
    let (clock, offset) = split_offset(time).ok_or_else(whole)?;
    let clock = clock.split_once('.').map_or(Ok(clock), |(hms, frac)| {
        if !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()) {
            Ok(hms)
        } else {
            Err(whole())
        }
    })?;
    let clock = NaiveTime::parse_from_str(clock, "%H:%M:%S").map_err(|_| whole())?;

    let local = date.and_time(clock);
    let instant = offset
        .from_local_datetime(&local)
        .single()
        .ok_or_else(whole)?;
    Ok(instant.with_timezone(&Utc))
}

/// Split a time token into the clock part and its zone offset.
fn split_offset(time: &str) -> Option<(&str, FixedOffset)> {
    let utc = FixedOffset::east_opt(0)?;

    if let Some(clock) = time.strip_suffix(['Z', 'z']) {
        return Some((clock, utc));
    }

    // The clock part is `HH:MM:SS[.fff]`, so a sign can only appear after it.
    match time.rfind(['+', '-']) {
        Some(idx) if idx >= 8 => {
            let (clock, zone) = time.split_at(idx);
            Some((clock, parse_offset(zone)?))
        }
        Some(_) => None,
        None => Some((time, utc)),
    }
}

/// Parse `±HH:MM`, `±HHMM` or `±HH`.
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let (sign, rest) = zone.split_at(1);
    let sign = if sign == "-" { -1 } else { 1 };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn malformed(text: &str) -> CodecError {
    CodecError::MalformedStamp(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_plain_stamp_is_utc() {
        assert_eq!(
            parse_stamp_parts("2025-07-01", "19:49:56").unwrap(),
            utc(2025, 7, 1, 19, 49, 56)
        );
    }

    #[test]
    fn test_fraction_is_discarded() {
        assert_eq!(
            parse_stamp_parts("2025-07-02", "14:21:54.363636").unwrap(),
            utc(2025, 7, 2, 14, 21, 54)
        );
    }

    #[test]
    fn test_offset_is_applied() {
        assert_eq!(
            parse_stamp_parts("2025-06-11", "18:41:03.621055+05:30").unwrap(),
            utc(2025, 6, 11, 13, 11, 3)
        );
        assert_eq!(
            parse_stamp_parts("2025-06-11", "18:41:03-0200").unwrap(),
            utc(2025, 6, 11, 20, 41, 3)
        );
        assert_eq!(
            parse_stamp_parts("2025-06-11", "18:41:03+01").unwrap(),
            utc(2025, 6, 11, 17, 41, 3)
        );
    }

    #[test]
    fn test_offset_crosses_midnight() {
        assert_eq!(
            parse_stamp_parts("2025-01-01", "02:00:00+05:30").unwrap(),
            utc(2024, 12, 31, 20, 30, 0)
        );
    }

    #[test]
    fn test_single_token_forms() {
        assert_eq!(parse_stamp("2025-07-01T19:49:56Z").unwrap(), utc(2025, 7, 1, 19, 49, 56));
        assert_eq!(
            parse_stamp("2025-07-01T19:49:56.5+00:00").unwrap(),
            utc(2025, 7, 1, 19, 49, 56)
        );
        assert!(parse_stamp("2025-07-01").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        for (date, time) in [
            ("2025-13-01", "00:00:00"),
            ("2025-07-01", "25:00:00"),
            ("2025-07-01", "19:49"),
            ("2025-07-01", "19:49:56."),
            ("2025-07-01", "19:49:56.12a"),
            ("2025-07-01", "19:49:56+5:3"),
            ("2025-07-01", "19:49:56+24:00"),
            ("20250701", "19:49:56"),
        ] {
            assert!(parse_stamp_parts(date, time).is_err(), "accepted {date} {time}");
        }
    }
}
