//! CSV export of readings
//!
//! Output is a `Timestamp,HeartRate,SpO2` header followed by one row per
//! reading. Timestamps are rendered the way a US-English locale prints a
//! date and time (`1/1/2024, 12:00:00 AM`). That rendering contains a comma,
//! so fields are quoted when needed.

use crate::error::ExportError;
use crate::readings::{Reading, Timestamp};
use chrono::FixedOffset;
use std::borrow::Cow;
use std::io::Write;

/// Header row of the export
pub const CSV_HEADER: &str = "Timestamp,HeartRate,SpO2";

/// File name suggested to HTTP clients
pub const EXPORT_FILENAME: &str = "vitals_history.csv";

/// chrono format for a US-English locale date and time
pub const LOCALE_TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// Render a timestamp in the reporting offset with the locale format
pub fn format_locale_timestamp(timestamp: &Timestamp, offset: FixedOffset) -> String {
    timestamp
        .with_timezone(&offset)
        .format(LOCALE_TIMESTAMP_FORMAT)
        .to_string()
}

/// Render readings as CSV text, rows separated by `\n`, no trailing newline
pub fn to_csv(readings: &[Reading], offset: FixedOffset) -> String {
    let mut lines = Vec::with_capacity(readings.len() + 1);
    lines.push(CSV_HEADER.to_string());
    lines.extend(readings.iter().map(|reading| csv_row(reading, offset)));
    lines.join("\n")
}

/// Write the CSV export to any writer, followed by a final newline
pub fn write_csv<W: Write>(
    writer: &mut W,
    readings: &[Reading],
    offset: FixedOffset,
) -> Result<(), ExportError> {
    writeln!(writer, "{}", to_csv(readings, offset))?;
    writer.flush()?;
    Ok(())
}

fn csv_row(reading: &Reading, offset: FixedOffset) -> String {
    let timestamp = format_locale_timestamp(&reading.timestamp, offset);
    format!(
        "{},{},{}",
        escape_field(&timestamp),
        reading.heart_rate,
        reading.spo2
    )
}

fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_single_reading_export() {
        let reading = Reading::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 72.0, 98.0);

        let csv = to_csv(&[reading], utc());
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Timestamp,HeartRate,SpO2");
        assert_eq!(lines[1], "\"1/1/2024, 12:00:00 AM\",72,98");
    }

    #[test]
    fn test_empty_export_is_header_only() {
        assert_eq!(to_csv(&[], utc()), CSV_HEADER);
    }

    #[test]
    fn test_locale_timestamp_afternoon_and_offset() {
        let timestamp = Utc.with_ymd_and_hms(2024, 11, 5, 13, 7, 9).unwrap();
        assert_eq!(format_locale_timestamp(&timestamp, utc()), "11/5/2024, 1:07:09 PM");

        let minus_five = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(
            format_locale_timestamp(&timestamp, minus_five),
            "11/5/2024, 8:07:09 AM"
        );
    }

    #[test]
    fn test_fractional_values_unchanged() {
        let reading = Reading::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(), 72.5, 97.25);
        let csv = to_csv(&[reading], utc());
        assert!(csv.ends_with(",72.5,97.25"));
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_write_csv_appends_newline() {
        let reading = Reading::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 72.0, 98.0);
        let mut buffer = Vec::new();

        write_csv(&mut buffer, &[reading], utc()).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("Timestamp,HeartRate,SpO2\n"));
        assert!(text.ends_with("98\n"));
    }
}
