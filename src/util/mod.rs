//! Utility module
//!
//! This module provides common utilities and helper functions used
//! throughout the library.

use chrono::{DateTime, Local, Utc};

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn unix_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Maps a connection string to a stem usable in file names
pub fn sanitize(connection: &str) -> String {
    connection
        .chars()
        .map(|c| match c {
            ':' | '.' | '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// Timestamp used in report file names, e.g. `20240131_235959`
pub fn file_stamp(time: DateTime<Local>) -> String {
    time.format("%Y%m%d_%H%M%S").to_string()
}

/// Formats an optional value with a unit, or `N/A`
pub fn format_optional(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.2}{}", v, unit),
        None => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("udpin:0.0.0.0:14550"), "udpin_0_0_0_0_14550");
        assert_eq!(sanitize("/dev/ttyUSB0:57600"), "_dev_ttyUSB0_57600");
        assert_eq!(sanitize("COM3:115200"), "COM3_115200");
    }

    #[test]
    fn test_file_stamp() {
        let time = Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 5).unwrap();
        assert_eq!(file_stamp(time), "20240131_235905");
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some(12.346), "ms"), "12.35ms");
        assert_eq!(format_optional(Some(50.0), "%"), "50.00%");
        assert_eq!(format_optional(None, "ms"), "N/A");
    }

    #[test]
    fn test_unix_nanos_is_recent() {
        // 2020-01-01 in nanoseconds
        assert!(unix_nanos() > 1_577_836_800_000_000_000);
    }
}
