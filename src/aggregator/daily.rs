//! Per-day grouping and summary statistics
//!
//! Readings are bucketed by the calendar date of their timestamp in the
//! reporting offset. Each non-empty bucket produces one `DailySummary` with
//! heart rate and SpO2 statistics.

use crate::readings::Reading;
use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Average, minimum and maximum of one numeric field
///
/// `avg` is rounded to one decimal place and always lies within `[min, max]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FieldStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Statistics for all readings that fall on one calendar date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    /// Calendar date in the reporting offset
    pub date: NaiveDate,
    /// Number of readings on this date
    pub count: usize,
    pub heart_rate: FieldStats,
    pub spo2: FieldStats,
}

/// Calendar date of a reading in the given offset
pub fn reading_date(reading: &Reading, offset: FixedOffset) -> NaiveDate {
    reading.timestamp.with_timezone(&offset).date_naive()
}

/// Partition readings by calendar date
///
/// Arrival order is preserved within each date. Dates iterate in
/// chronological order.
pub fn group_by_day(readings: &[Reading], offset: FixedOffset) -> BTreeMap<NaiveDate, Vec<Reading>> {
    let mut groups: BTreeMap<NaiveDate, Vec<Reading>> = BTreeMap::new();
    for reading in readings {
        groups
            .entry(reading_date(reading, offset))
            .or_default()
            .push(reading.clone());
    }
    groups
}

/// Summarize a list of values
///
/// Returns `None` when there is no finite value to summarize. Non-finite
/// values are ignored.
pub fn summarize(values: &[f64]) -> Option<FieldStats> {
    let mut finite = values.iter().copied().filter(|v| v.is_finite());
    let first = finite.next()?;

    let mut min = first;
    let mut max = first;
    let mut sum = first;
    let mut count = 1usize;

    for value in finite {
        if value < min {
            min = value;
        }
        if value > max {
            max = value;
        }
        sum += value;
        count += 1;
    }

    // Rounding can push the mean just past an extreme.
    let avg = round_one_decimal(sum / count as f64).clamp(min, max);

    Some(FieldStats { avg, min, max })
}

/// Build one summary row per calendar date, in chronological order
pub fn daily_summaries(readings: &[Reading], offset: FixedOffset) -> Vec<DailySummary> {
    group_by_day(readings, offset)
        .into_iter()
        .filter_map(|(date, entries)| {
            let heart_rates: Vec<f64> = entries.iter().map(|r| r.heart_rate).collect();
            let spo2_values: Vec<f64> = entries.iter().map(|r| r.spo2).collect();

            Some(DailySummary {
                date,
                count: entries.len(),
                heart_rate: summarize(&heart_rates)?,
                spo2: summarize(&spo2_values)?,
            })
        })
        .collect()
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
