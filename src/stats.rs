//! Counts, averages and trends over a set of measurements.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::classify::primary_value;
use crate::limits::LimitDefaults;
use crate::record::{Measurement, MeasurementType};

/// Relative change, in percent, below which a type is considered stable.
pub const STABLE_BAND_PERCENT: f64 = 5.0;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// Windowed trend of one measurement type.
///
/// A decrease counts as an improvement for every type. This is a fixed convention of the
/// dashboard, not derived from the limits, and is questionable for quantities with a lower
/// bound such as luminosity.
pub enum Trend {
    Improving,
    Worsening,
    Stable,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// Direction of a record compared to the previous record of the same type and location.
pub enum Direction {
    Up,
    Down,
    Stable,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypeTrend {
    #[serde(rename = "type")]
    pub kind: MeasurementType,
    pub trend: Trend,
    pub change_percent: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Dashboard card of one measurement type.
pub struct TypeStatus {
    #[serde(rename = "type")]
    pub kind: MeasurementType,
    pub count: usize,
    pub latest: Option<Measurement>,
    /// Latest record evaluated against the current defaults, not its own snapshot.
    pub is_out_of_spec: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub total_measurements: usize,
    pub measurements_by_type: BTreeMap<MeasurementType, usize>,
    pub measurements_by_location: BTreeMap<String, usize>,
    /// Counted against each record's own limits snapshot.
    pub out_of_spec_count: usize,
    pub out_of_spec_percentage: f64,
    pub averages_by_type: BTreeMap<MeasurementType, f64>,
    pub recent_trends: Vec<TypeTrend>,
    pub latest_by_type: Vec<TypeStatus>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Maps a relative change to a trend. The stable band excludes its edges.
pub fn classify_change(change_percent: f64) -> Trend {
    if change_percent.abs() < STABLE_BAND_PERCENT {
        Trend::Stable
    } else if change_percent < 0.0 {
        Trend::Improving
    } else {
        Trend::Worsening
    }
}

/// Trend of primary values ordered newest first.
///
/// The first half (rounded down) is the recent window, the rest the older window. The change
/// is the relative difference of the window means, 0 when the older mean is 0.
pub fn windowed_trend(newest_first: &[f64]) -> (Trend, f64) {
    if newest_first.len() < 2 {
        return (Trend::Stable, 0.0);
    }
    let (recent, older) = newest_first.split_at(newest_first.len() / 2);
    let recent_mean = mean(recent);
    let older_mean = mean(older);

    let change_percent = if older_mean != 0.0 {
        (recent_mean - older_mean) / older_mean * 100.0
    } else {
        0.0
    };
    (classify_change(change_percent), change_percent)
}

pub fn compute_trend_direction(current: f64, previous: f64) -> Direction {
    if current > previous {
        Direction::Up
    } else if current < previous {
        Direction::Down
    } else {
        Direction::Stable
    }
}

/// Groups by type, each group ordered newest first regardless of the input order.
fn group_by_type(measurements: &[Measurement]) -> BTreeMap<MeasurementType, Vec<&Measurement>> {
    let mut groups: BTreeMap<MeasurementType, Vec<&Measurement>> = BTreeMap::new();
    for measurement in measurements {
        groups.entry(measurement.kind()).or_default().push(measurement);
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| b.date.cmp(&a.date));
    }
    groups
}

/// One status per measurement type, in dashboard order.
pub fn latest_by_type(measurements: &[Measurement], defaults: &LimitDefaults) -> Vec<TypeStatus> {
    let groups = group_by_type(measurements);
    MeasurementType::ALL
        .iter()
        .map(|kind| {
            let group = groups.get(kind);
            let latest = group.and_then(|group| group.first()).copied();
            TypeStatus {
                kind: *kind,
                count: group.map_or(0, Vec::len),
                latest: latest.cloned(),
                is_out_of_spec: latest.map_or(false, |latest| defaults.is_out_of_spec(latest)),
            }
        })
        .collect()
}

pub fn summarize(measurements: &[Measurement], defaults: &LimitDefaults) -> StatisticsSnapshot {
    let mut measurements_by_type = BTreeMap::new();
    let mut measurements_by_location = BTreeMap::new();
    let mut out_of_spec_count = 0;

    for measurement in measurements {
        *measurements_by_type.entry(measurement.kind()).or_insert(0) += 1;
        *measurements_by_location
            .entry(measurement.location.clone())
            .or_insert(0) += 1;
        if measurement.is_out_of_spec() {
            out_of_spec_count += 1;
        }
    }

    let total_measurements = measurements.len();
    let out_of_spec_percentage = if total_measurements > 0 {
        out_of_spec_count as f64 / total_measurements as f64 * 100.0
    } else {
        0.0
    };

    let mut averages_by_type = BTreeMap::new();
    let mut recent_trends = Vec::new();
    for (kind, group) in group_by_type(measurements) {
        let values: Vec<f64> = group.iter().map(|m| primary_value(&m.reading)).collect();
        averages_by_type.insert(kind, mean(&values));
        let (trend, change_percent) = windowed_trend(&values);
        recent_trends.push(TypeTrend {
            kind,
            trend,
            change_percent,
        });
    }

    StatisticsSnapshot {
        total_measurements,
        measurements_by_type,
        measurements_by_location,
        out_of_spec_count,
        out_of_spec_percentage,
        averages_by_type,
        recent_trends,
        latest_by_type: latest_by_type(measurements, defaults),
    }
}
