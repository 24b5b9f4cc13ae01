//! JSON import and export of measurements.
//!
//! Import documents have the shape `{ "measurements": [...] }`, which is also what the export
//! bundle contains, so an export can be imported again.
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::limits::LimitDefaults;
use crate::record::{Measurement, NewMeasurement};
use crate::stats::{self, StatisticsSnapshot};
use crate::store::MeasurementStore;

/// Records imported between two progress reports.
pub const IMPORT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportProgress {
    pub imported: usize,
    pub total: usize,
}

#[derive(Deserialize)]
struct ImportDocument {
    measurements: Option<Vec<Value>>,
}

/// Parses an import document into its raw records.
pub fn parse_import(json: &str) -> Result<Vec<Value>> {
    let document: ImportDocument = serde_json::from_str(json)
        .map_err(|err| Error::InvalidDocument(format!("expected {{ measurements: [...] }}: {}", err)))?;
    let records = document.measurements.ok_or_else(|| {
        Error::InvalidDocument(String::from("expected { measurements: [...] }"))
    })?;
    if records.is_empty() {
        return Err(Error::InvalidDocument(String::from("no measurements found")));
    }
    Ok(records)
}

fn has_text(record: &Value, field: &str) -> bool {
    record
        .get(field)
        .and_then(Value::as_str)
        .map_or(false, |text| !text.is_empty())
}

fn parse_record(index: usize, record: &Value) -> Result<NewMeasurement> {
    if !["type", "date", "location"].iter().all(|field| has_text(record, field)) {
        return Err(Error::MalformedImport {
            index,
            reason: String::from("missing required fields (type, date, location)"),
        });
    }
    serde_json::from_value(record.clone()).map_err(|err| Error::MalformedImport {
        index,
        reason: err.to_string(),
    })
}

/// Adds `records` to `store` in batches of [`IMPORT_BATCH_SIZE`], reporting progress after every
/// batch. Returns the number of imported records.
///
/// Stops at the first record that cannot be imported and reports its index. Records imported
/// before it stay in the store.
pub fn import_measurements<F>(store: &mut MeasurementStore, records: &[Value], mut progress: F) -> Result<usize>
where
    F: FnMut(ImportProgress),
{
    let total = records.len();
    let mut imported = 0;
    for (batch_index, batch) in records.chunks(IMPORT_BATCH_SIZE).enumerate() {
        for (offset, record) in batch.iter().enumerate() {
            let index = batch_index * IMPORT_BATCH_SIZE + offset;
            let draft = parse_record(index, record)?;
            store.add(draft).map_err(|err| match err {
                Error::Validation { .. } => Error::MalformedImport {
                    index,
                    reason: err.to_string(),
                },
                other => other,
            })?;
            imported += 1;
        }
        log::info!(target: "wpmon::import", "Imported {} of {} measurements", imported, total);
        progress(ImportProgress { imported, total });
    }
    Ok(imported)
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    #[serde(flatten)]
    pub measurement: Measurement,
    /// Against the record's own limits snapshot.
    pub out_of_spec: bool,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub generated_at: DateTime<Utc>,
    pub measurements: Vec<ExportRecord>,
    pub statistics: StatisticsSnapshot,
}

pub fn export_bundle(measurements: &[Measurement], defaults: &LimitDefaults) -> ExportBundle {
    ExportBundle {
        generated_at: Utc::now(),
        measurements: measurements
            .iter()
            .map(|measurement| ExportRecord {
                out_of_spec: measurement.is_out_of_spec(),
                measurement: measurement.clone(),
            })
            .collect(),
        statistics: stats::summarize(measurements, defaults),
    }
}

pub fn write_export<W: Write>(bundle: &ExportBundle, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, bundle)?;
    Ok(())
}
