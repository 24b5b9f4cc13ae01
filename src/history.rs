//! History listing: chronological trend arrows and filters.
use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::classify::primary_value;
use crate::record::{Measurement, MeasurementType};
use crate::stats::{compute_trend_direction, Direction};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry<'a> {
    #[serde(flatten)]
    pub measurement: &'a Measurement,
    /// `None` for the oldest record of its type and location.
    pub trend: Option<Direction>,
}

/// Annotates every record with its direction relative to the next older record sharing the
/// same type and location. `measurements` must be ordered newest first, as the store keeps it.
pub fn annotate(measurements: &[Measurement]) -> Vec<HistoryEntry<'_>> {
    let mut previous: HashMap<(MeasurementType, &str), f64> = HashMap::new();
    let mut entries: Vec<HistoryEntry<'_>> = measurements
        .iter()
        .rev()
        .map(|measurement| {
            let value = primary_value(&measurement.reading);
            let key = (measurement.kind(), measurement.location.as_str());
            let trend = previous
                .insert(key, value)
                .map(|older| compute_trend_direction(value, older));
            HistoryEntry { measurement, trend }
        })
        .collect();
    entries.reverse();
    entries
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub kind: Option<MeasurementType>,
    /// Case insensitive substring of the location.
    pub location: Option<String>,
    /// Case insensitive substring of the notes.
    pub notes: Option<String>,
    pub date_from: Option<NaiveDate>,
    /// Inclusive, the whole day counts.
    pub date_to: Option<NaiveDate>,
    pub year: Option<i32>,
    /// 1 to 12.
    pub month: Option<u32>,
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl HistoryFilter {
    pub fn matches(&self, measurement: &Measurement) -> bool {
        if self.kind.map_or(false, |kind| measurement.kind() != kind) {
            return false;
        }
        if let Some(location) = self.location.as_deref().filter(|s| !s.is_empty()) {
            if !contains_ignore_case(&measurement.location, location) {
                return false;
            }
        }
        if let Some(notes) = self.notes.as_deref().filter(|s| !s.is_empty()) {
            if !contains_ignore_case(measurement.notes.as_deref().unwrap_or(""), notes) {
                return false;
            }
        }
        if let Some(start) = self.date_from.and_then(start_of_day) {
            if measurement.date < start {
                return false;
            }
        }
        if let Some(end) = self.date_to.and_then(start_of_day) {
            if measurement.date > end + Duration::days(1) {
                return false;
            }
        }
        if self.year.map_or(false, |year| measurement.date.year() != year) {
            return false;
        }
        if self.month.map_or(false, |month| measurement.date.month() != month) {
            return false;
        }
        true
    }
}

/// Annotates the whole list, then keeps the entries matching `filter`. Trends therefore refer
/// to the previous record even if that one is filtered out.
pub fn history<'a>(measurements: &'a [Measurement], filter: &HistoryFilter) -> Vec<HistoryEntry<'a>> {
    annotate(measurements)
        .into_iter()
        .filter(|entry| filter.matches(entry.measurement))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NewMeasurement, RangeLimits, Reading};

    fn torque(id: &str, date: (i32, u32, u32), location: &str, value: f64, notes: Option<&str>) -> Measurement {
        NewMeasurement {
            date: Utc.with_ymd_and_hms(date.0, date.1, date.2, 10, 30, 0).unwrap(),
            location: location.to_string(),
            device_id: None,
            notes: notes.map(str::to_string),
            reading: Reading::Torque {
                screwdriver_id: String::from("SD-007"),
                torque_value: value,
                limits: RangeLimits { min: 4.0, max: 6.0 },
            },
        }
        .into_measurement(id.to_string())
    }

    fn sample() -> Vec<Measurement> {
        vec![
            torque("d", (2024, 3, 4), "Station 3", 5.5, Some("After Calibration")),
            torque("c", (2024, 3, 3), "Station 4", 4.2, None),
            torque("b", (2024, 3, 2), "Station 3", 5.0, None),
            torque("a", (2023, 12, 1), "Station 3", 5.0, None),
        ]
    }

    #[test]
    fn newer_record_above_previous_points_up() {
        let measurements = sample();
        let entries = annotate(&measurements);
        let trends: Vec<(&str, Option<Direction>)> = entries
            .iter()
            .map(|entry| (entry.measurement.id.as_str(), entry.trend))
            .collect();
        assert_eq!(
            trends,
            vec![
                ("d", Some(Direction::Up)),
                ("c", None),
                ("b", Some(Direction::Stable)),
                ("a", None),
            ]
        );
    }

    #[test]
    fn filters_by_location_and_notes_ignoring_case() {
        let measurements = sample();
        let filter = HistoryFilter {
            location: Some(String::from("station 3")),
            notes: Some(String::from("calibration")),
            ..HistoryFilter::default()
        };
        let entries = history(&measurements, &filter);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].measurement.id, "d");
        assert_eq!(entries[0].trend, Some(Direction::Up));
    }

    #[test]
    fn date_to_includes_whole_day() {
        let measurements = sample();
        let filter = HistoryFilter {
            date_from: NaiveDate::from_ymd_opt(2024, 3, 2),
            date_to: NaiveDate::from_ymd_opt(2024, 3, 3),
            ..HistoryFilter::default()
        };
        let ids: Vec<&str> = history(&measurements, &filter)
            .iter()
            .map(|entry| entry.measurement.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn filters_by_year_month_and_type() {
        let measurements = sample();
        let filter = HistoryFilter {
            year: Some(2023),
            month: Some(12),
            kind: Some(MeasurementType::Torque),
            ..HistoryFilter::default()
        };
        assert_eq!(history(&measurements, &filter).len(), 1);

        let other_type = HistoryFilter {
            kind: Some(MeasurementType::Luminosity),
            ..HistoryFilter::default()
        };
        assert!(history(&measurements, &other_type).is_empty());
    }
}
