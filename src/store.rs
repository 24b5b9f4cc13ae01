//! In-memory collection of measurements.
//!
//! The list is kept sorted by date, newest first. Mutations never touch a list handed out
//! earlier: every change builds a new list and swaps the shared pointer.
use std::sync::Arc;

use serde_json::json;

use crate::audit::{self, AuditAction, AuditEntity, AuditEvent, AuditTrail};
use crate::error::Result;
use crate::notify::Notifier;
use crate::record::{Measurement, NewMeasurement};
use crate::storage::Storage;
use crate::validate;

/// Called with the new snapshot after every change of the list.
pub type MeasurementsListener = Box<dyn Fn(&Arc<Vec<Measurement>>) + Send>;

pub struct MeasurementStore {
    measurements: Arc<Vec<Measurement>>,
    listeners: Vec<MeasurementsListener>,
    storage: Arc<dyn Storage>,
    audit: AuditTrail,
    notifier: Notifier,
}

fn sort_newest_first(measurements: &mut [Measurement]) {
    measurements.sort_by(|a, b| b.date.cmp(&a.date));
}

impl MeasurementStore {
    pub fn new(
        mut measurements: Vec<Measurement>,
        storage: Arc<dyn Storage>,
        audit: AuditTrail,
        notifier: Notifier,
    ) -> Self {
        sort_newest_first(&mut measurements);
        MeasurementStore {
            measurements: Arc::new(measurements),
            listeners: Vec::new(),
            storage,
            audit,
            notifier,
        }
    }

    pub fn load(storage: Arc<dyn Storage>, audit: AuditTrail, notifier: Notifier) -> Result<Self> {
        let measurements = storage.load_measurements()?.unwrap_or_default();
        log::info!(target: "wpmon::store", "Loaded {} measurements", measurements.len());
        Ok(MeasurementStore::new(measurements, storage, audit, notifier))
    }

    /// Snapshot of the current list. Later mutations do not change it.
    pub fn measurements(&self) -> Arc<Vec<Measurement>> {
        Arc::clone(&self.measurements)
    }

    pub fn as_slice(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn get(&self, id: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|measurement| measurement.id == id)
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn on_change(&mut self, listener: MeasurementsListener) {
        self.listeners.push(listener);
    }

    /// Validates `draft`, assigns a fresh identifier and inserts it.
    ///
    /// The limits snapshot of the draft is stored as given.
    pub fn add(&mut self, draft: NewMeasurement) -> Result<Measurement> {
        validate::validate(&draft)?;
        let measurement = draft.into_measurement(uuid::Uuid::new_v4().to_string());

        let mut next = Vec::with_capacity(self.measurements.len() + 1);
        next.extend(self.measurements.iter().cloned());
        next.push(measurement.clone());
        self.replace(next);

        self.audit.record(
            AuditEvent::new(AuditAction::Create, AuditEntity::Measurement)
                .entity(measurement.id.as_str())
                .metadata(json!({
                    "type": measurement.kind(),
                    "location": measurement.location,
                })),
        );
        log::debug!(target: "wpmon::store", "Added measurement '{}'", measurement.id);
        self.persist();
        self.notifier.success("Measurement added");
        Ok(measurement)
    }

    /// Replaces the record `id` with `draft`. Unknown ids leave the store unchanged and
    /// return `Ok(None)`.
    ///
    /// An update with identical data still records an audit entry, with an empty change list.
    pub fn update(&mut self, id: &str, draft: NewMeasurement) -> Result<Option<Measurement>> {
        validate::validate(&draft)?;
        let previous = match self.get(id) {
            Some(previous) => previous.clone(),
            None => {
                log::debug!(target: "wpmon::store", "Update of unknown measurement '{}' ignored", id);
                return Ok(None);
            }
        };

        let updated = draft.into_measurement(previous.id.clone());
        let changes = audit::diff(&previous, &updated)?;

        let next: Vec<Measurement> = self
            .measurements
            .iter()
            .map(|measurement| {
                if measurement.id == id {
                    updated.clone()
                } else {
                    measurement.clone()
                }
            })
            .collect();
        self.replace(next);

        self.audit.record(
            AuditEvent::new(AuditAction::Update, AuditEntity::Measurement)
                .entity(id)
                .changes(changes),
        );
        log::debug!(target: "wpmon::store", "Updated measurement '{}'", id);
        self.persist();
        self.notifier.success("Measurement updated");
        Ok(Some(updated))
    }

    /// Removes the record `id`. Unknown ids leave the store unchanged and return `None`.
    pub fn delete(&mut self, id: &str) -> Option<Measurement> {
        let removed = self.get(id)?.clone();
        let next: Vec<Measurement> = self
            .measurements
            .iter()
            .filter(|measurement| measurement.id != id)
            .cloned()
            .collect();
        self.replace(next);

        self.audit.record(
            AuditEvent::new(AuditAction::Delete, AuditEntity::Measurement)
                .entity(id)
                .metadata(json!({
                    "type": removed.kind(),
                    "location": removed.location,
                })),
        );
        log::debug!(target: "wpmon::store", "Deleted measurement '{}'", id);
        self.persist();
        self.notifier.success("Measurement deleted");
        Some(removed)
    }

    /// Removes every record. Returns the number of removed records.
    pub fn clear(&mut self) -> usize {
        let cleared = self.measurements.len();
        self.replace(Vec::new());
        self.audit.record(
            AuditEvent::new(AuditAction::Delete, AuditEntity::Measurement)
                .metadata(json!({ "cleared": cleared })),
        );
        self.persist();
        self.notifier.warning("All measurements cleared");
        cleared
    }

    /// Adopts a list that came from storage, e.g. a remote change. Nothing is written back.
    pub fn replace_all(&mut self, measurements: Vec<Measurement>) {
        log::debug!(target: "wpmon::store", "Adopting {} measurements from storage", measurements.len());
        self.replace(measurements);
    }

    fn replace(&mut self, mut next: Vec<Measurement>) {
        sort_newest_first(&mut next);
        self.measurements = Arc::new(next);
        for listener in &self.listeners {
            listener(&self.measurements);
        }
    }

    // The in-memory list is authoritative, a failed write is only reported.
    fn persist(&self) {
        if let Err(err) = self.storage.save_measurements(&self.measurements) {
            log::error!(target: "wpmon::store", "Could not save measurements: '{}'", err);
            self.notifier.error(format!("Could not save measurements: {}", err));
        }
    }
}
