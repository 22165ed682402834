//! Conversion of EFA clock times into GTFS time strings.
//!
//! GTFS encodes post-midnight service as hours beyond 23 ("24:xx".."29:xx")
//! on the previous service day instead of wrapping to the next calendar day.

use anyhow::{Context, Result};

/// Converts an hour/minute pair into a zero-padded GTFS `HH:MM` string.
///
/// The hour is shifted by 24 when it is below 4, or when `start_hour` is
/// given and exceeds the raw hour. Both rules detect a trip that started
/// before midnight and is still running.
pub fn gtfs_hour_minute(hour_str: &str, minute_str: &str, start_hour: Option<u32>) -> Result<String> {
    let mut hour: u32 = hour_str
        .trim()
        .parse()
        .with_context(|| format!("invalid hour {hour_str:?}"))?;
    let minute: u32 = minute_str
        .trim()
        .parse()
        .with_context(|| format!("invalid minute {minute_str:?}"))?;
    if hour < 4 || start_hour.is_some_and(|start| start > hour) {
        hour += 24;
    }
    Ok(format!("{hour:02}:{minute:02}"))
}

/// Splits an EFA date-time string (`"20180611 08:15"`) into its hour and
/// minute components.
pub fn split_efa_time(raw: &str) -> Result<(&str, &str)> {
    let time = raw
        .split_whitespace()
        .last()
        .with_context(|| format!("empty date-time value {raw:?}"))?;
    time.split_once(':')
        .with_context(|| format!("date-time value {raw:?} has no HH:MM part"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_daytime() {
        assert_eq!(gtfs_hour_minute("08", "05", None).unwrap(), "08:05");
    }

    #[test]
    fn test_zero_padding() {
        assert_eq!(gtfs_hour_minute("8", "5", None).unwrap(), "08:05");
    }

    #[test]
    fn test_early_hour_rolls_over() {
        // Hours below 4 always belong to the previous service day.
        assert_eq!(gtfs_hour_minute("02", "15", Some(23)).unwrap(), "26:15");
        assert_eq!(gtfs_hour_minute("0", "30", None).unwrap(), "24:30");
        assert_eq!(gtfs_hour_minute("3", "59", None).unwrap(), "27:59");
    }

    #[test]
    fn test_start_hour_forces_rollover() {
        // 05:10 on a trip that started at 22:xx is past midnight.
        assert_eq!(gtfs_hour_minute("5", "10", Some(22)).unwrap(), "29:10");
        // Same-hour start does not roll over.
        assert_eq!(gtfs_hour_minute("22", "10", Some(22)).unwrap(), "22:10");
    }

    #[test]
    fn test_four_oclock_is_kept() {
        assert_eq!(gtfs_hour_minute("4", "00", None).unwrap(), "04:00");
    }

    #[test]
    fn test_invalid_hour_is_an_error() {
        assert!(gtfs_hour_minute("ab", "00", None).is_err());
    }

    #[test]
    fn test_split_efa_time() {
        assert_eq!(split_efa_time("20180611 08:15").unwrap(), ("08", "15"));
        assert!(split_efa_time("20180611").unwrap_err().to_string().contains("HH:MM"));
    }
}
