//! Application facade.
//!
//! Wires the measurement store, limit defaults, specification catalog and audit trail to one
//! storage stack and one notification channel.
use std::io::Write;
use std::sync::Arc;

use serde_json::json;

use crate::audit::{AuditAction, AuditEntity, AuditEvent, AuditTrail};
use crate::error::{Error, Result};
use crate::history::{self, HistoryEntry, HistoryFilter};
use crate::limits::{LimitDefaults, LimitsRegistry};
use crate::notify::Notifier;
use crate::record::{Limits, Measurement, MeasurementType, NewMeasurement};
use crate::specification::{IsoSpecification, SpecificationCatalog};
use crate::stats::{self, StatisticsSnapshot, TypeStatus};
use crate::storage::{ChangeCallback, Storage, Subscription};
use crate::store::MeasurementStore;
use crate::transfer::{self, ImportProgress};

pub struct Monitor {
    storage: Arc<dyn Storage>,
    audit: AuditTrail,
    store: MeasurementStore,
    limits: LimitsRegistry,
    specifications: SpecificationCatalog,
    notifier: Notifier,
}

impl Monitor {
    /// Loads every collection from `storage`. Collections that were never stored start with
    /// their built-in defaults.
    pub fn open(storage: Arc<dyn Storage>, notifier: Notifier, actor: impl Into<String>) -> Result<Self> {
        let audit = AuditTrail::load(Arc::clone(&storage), notifier.clone(), actor)?;
        let store = MeasurementStore::load(Arc::clone(&storage), audit.clone(), notifier.clone())?;
        let limits = LimitsRegistry::load(Arc::clone(&storage), audit.clone(), notifier.clone())?;
        let specifications = SpecificationCatalog::load(Arc::clone(&storage), audit.clone(), notifier.clone())?;
        log::info!(target: "wpmon::monitor", "Opened with {} measurements for '{}'", store.len(), audit.actor());

        Ok(Monitor {
            storage,
            audit,
            store,
            limits,
            specifications,
            notifier,
        })
    }

    pub fn store(&self) -> &MeasurementStore {
        &self.store
    }

    pub fn measurements(&self) -> Arc<Vec<Measurement>> {
        self.store.measurements()
    }

    pub fn limits(&self) -> Arc<LimitDefaults> {
        self.limits.current()
    }

    pub fn limits_registry(&mut self) -> &mut LimitsRegistry {
        &mut self.limits
    }

    pub fn specifications(&self) -> &SpecificationCatalog {
        &self.specifications
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn login(&mut self, actor: impl Into<String>) {
        let actor = actor.into();
        self.audit.set_actor(actor.as_str());
        self.audit
            .record(AuditEvent::new(AuditAction::Login, AuditEntity::User).entity(actor));
    }

    pub fn logout(&mut self) {
        let actor = self.audit.actor();
        self.audit
            .record(AuditEvent::new(AuditAction::Logout, AuditEntity::User).entity(actor));
    }

    /// Records a new measurement with the current limit defaults as its snapshot.
    pub fn record(&mut self, mut draft: NewMeasurement) -> Result<Measurement> {
        self.limits.current().stamp(&mut draft.reading);
        self.store.add(draft)
    }

    /// Replaces a measurement. The snapshot is taken again from the current defaults.
    pub fn edit(&mut self, id: &str, mut draft: NewMeasurement) -> Result<Option<Measurement>> {
        self.limits.current().stamp(&mut draft.reading);
        self.store.update(id, draft)
    }

    pub fn delete(&mut self, id: &str) -> Option<Measurement> {
        self.store.delete(id)
    }

    pub fn clear(&mut self) -> usize {
        self.store.clear()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        stats::summarize(self.store.as_slice(), &self.limits.current())
    }

    /// Status of every measurement type, latest records judged by the current defaults.
    pub fn dashboard(&self) -> Vec<TypeStatus> {
        stats::latest_by_type(self.store.as_slice(), &self.limits.current())
    }

    pub fn history(&self, filter: &HistoryFilter) -> Vec<HistoryEntry<'_>> {
        history::history(self.store.as_slice(), filter)
    }

    pub fn update_limits(&mut self, limits: Limits) -> Result<()> {
        self.limits.update(limits)
    }

    pub fn upsert_specification(&mut self, specification: IsoSpecification) -> Result<()> {
        self.specifications.upsert(specification)
    }

    pub fn remove_specification(&mut self, kind: MeasurementType) -> Option<IsoSpecification> {
        self.specifications.remove(kind)
    }

    /// Imports an `{ "measurements": [...] }` document. Returns the number of imported records.
    ///
    /// On a malformed record the records before it stay imported and the error names its index.
    pub fn import_json<F>(&mut self, json: &str, progress: F) -> Result<usize>
    where
        F: FnMut(ImportProgress),
    {
        let records = match transfer::parse_import(json) {
            Ok(records) => records,
            Err(err) => {
                self.notifier.error(format!("Import failed: {}", err));
                return Err(err);
            }
        };

        match transfer::import_measurements(&mut self.store, &records, progress) {
            Ok(imported) => {
                self.audit.record(
                    AuditEvent::new(AuditAction::Import, AuditEntity::Measurement)
                        .metadata(json!({ "count": imported })),
                );
                self.notifier.success(format!("Imported {} measurements", imported));
                Ok(imported)
            }
            Err(err) => {
                if let Error::MalformedImport { index, .. } = &err {
                    self.audit.record(
                        AuditEvent::new(AuditAction::Import, AuditEntity::Measurement)
                            .metadata(json!({ "count": index, "failedIndex": index })),
                    );
                }
                self.notifier.error(format!("Import failed: {}", err));
                Err(err)
            }
        }
    }

    /// Writes the export bundle of the current list. Returns the number of exported records,
    /// 0 without writing anything when there is no data.
    pub fn export_json<W: Write>(&self, writer: W) -> Result<usize> {
        let measurements = self.store.measurements();
        if measurements.is_empty() {
            self.notifier.warning("No data to export");
            return Ok(0);
        }

        let bundle = transfer::export_bundle(&measurements, &self.limits.current());
        transfer::write_export(&bundle, writer)?;
        self.audit.record(
            AuditEvent::new(AuditAction::Export, AuditEntity::Measurement)
                .metadata(json!({ "count": measurements.len(), "format": "json" })),
        );
        self.notifier.success(format!("Exported {} measurements", measurements.len()));
        Ok(measurements.len())
    }

    /// Follows changes of the remote copy. `Ok(None)` without a remote store.
    pub fn subscribe(&self, callback: ChangeCallback) -> Result<Option<Subscription>> {
        self.storage.subscribe(callback)
    }

    /// Adopts a measurement list reported by the change subscription.
    pub fn apply_remote(&mut self, measurements: Vec<Measurement>) {
        self.store.replace_all(measurements);
    }
}
