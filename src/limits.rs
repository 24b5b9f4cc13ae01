//! Current limit defaults per measurement type.
//!
//! New and edited measurements take a snapshot of these values. The dashboard evaluates the
//! latest record of each type against them, everything else uses the snapshot stored on the
//! record.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{self, AuditAction, AuditEntity, AuditEvent, AuditTrail};
use crate::classify;
use crate::error::Result;
use crate::notify::Notifier;
use crate::record::{
    IonizerLimits, Limits, Measurement, MeasurementType, ParticleLimits, RangeLimits, Reading,
    TemperatureHumidityLimits,
};
use crate::storage::Storage;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
/// Limits of every measurement type. Types missing from a stored document keep the built-in
/// defaults.
pub struct LimitDefaults {
    pub temperature_humidity: TemperatureHumidityLimits,
    pub luminosity: RangeLimits,
    pub dustiness_iso6: ParticleLimits,
    pub dustiness_iso5: ParticleLimits,
    pub torque: RangeLimits,
    pub surface_resistance: RangeLimits,
    pub grounding_resistance: RangeLimits,
    pub ionizer: IonizerLimits,
}

impl Default for LimitDefaults {
    fn default() -> Self {
        LimitDefaults {
            temperature_humidity: TemperatureHumidityLimits {
                temperature_min: 15.0,
                temperature_max: 30.0,
                humidity_min: 30.0,
                humidity_max: 70.0,
            },
            luminosity: RangeLimits {
                min: 500.0,
                max: 1000.0,
            },
            dustiness_iso6: ParticleLimits {
                particles_0_5um_min: 0.0,
                particles_0_5um_max: 10200.0,
                particles_5um_min: 0.0,
                particles_5um_max: 2930.0,
            },
            dustiness_iso5: ParticleLimits {
                particles_0_5um_min: 0.0,
                particles_0_5um_max: 3520.0,
                particles_5um_min: 0.0,
                particles_5um_max: 293.0,
            },
            torque: RangeLimits { min: 4.0, max: 6.0 },
            surface_resistance: RangeLimits { min: 1e6, max: 1e9 },
            grounding_resistance: RangeLimits { min: 0.0, max: 1.0 },
            ionizer: IonizerLimits {
                decay_time: 5.0,
                balance: 35.0,
            },
        }
    }
}

impl LimitDefaults {
    pub fn get(&self, kind: MeasurementType) -> Limits {
        match kind {
            MeasurementType::TemperatureHumidity => Limits::TemperatureHumidity(self.temperature_humidity),
            MeasurementType::Luminosity => Limits::Luminosity(self.luminosity),
            MeasurementType::DustinessIso6 => Limits::DustinessIso6(self.dustiness_iso6),
            MeasurementType::DustinessIso5 => Limits::DustinessIso5(self.dustiness_iso5),
            MeasurementType::Torque => Limits::Torque(self.torque),
            MeasurementType::SurfaceResistance => Limits::SurfaceResistance(self.surface_resistance),
            MeasurementType::GroundingResistance => Limits::GroundingResistance(self.grounding_resistance),
            MeasurementType::Ionizer => Limits::Ionizer(self.ionizer),
        }
    }

    /// Replaces the limits of the type `limits` belongs to.
    pub fn set(&mut self, limits: Limits) {
        match limits {
            Limits::TemperatureHumidity(limits) => self.temperature_humidity = limits,
            Limits::Luminosity(limits) => self.luminosity = limits,
            Limits::DustinessIso6(limits) => self.dustiness_iso6 = limits,
            Limits::DustinessIso5(limits) => self.dustiness_iso5 = limits,
            Limits::Torque(limits) => self.torque = limits,
            Limits::SurfaceResistance(limits) => self.surface_resistance = limits,
            Limits::GroundingResistance(limits) => self.grounding_resistance = limits,
            Limits::Ionizer(limits) => self.ionizer = limits,
        }
    }

    /// Overwrites the limits snapshot of `reading` with the current values.
    pub fn stamp(&self, reading: &mut Reading) {
        match reading {
            Reading::TemperatureHumidity { limits, .. } => *limits = self.temperature_humidity,
            Reading::Luminosity { limits, .. } => *limits = self.luminosity,
            Reading::DustinessIso6 { limits, .. } => *limits = self.dustiness_iso6,
            Reading::DustinessIso5 { limits, .. } => *limits = self.dustiness_iso5,
            Reading::Torque { limits, .. } => *limits = self.torque,
            Reading::SurfaceResistance { limits, .. } => *limits = self.surface_resistance,
            Reading::GroundingResistance { limits, .. } => *limits = self.grounding_resistance,
            Reading::Ionizer { limits, .. } => *limits = self.ionizer,
        }
    }

    /// Classifies `measurement` against these limits instead of its own snapshot.
    pub fn is_out_of_spec(&self, measurement: &Measurement) -> bool {
        classify::is_out_of_spec(&measurement.reading, &self.get(measurement.kind()))
    }
}

/// Called with the new defaults after every update.
pub type LimitsListener = Box<dyn Fn(&LimitDefaults) + Send>;

/// Owner of the current defaults. Updates replace the shared snapshot, readers holding an
/// earlier [`Arc`] keep seeing the values they got.
pub struct LimitsRegistry {
    current: Arc<LimitDefaults>,
    listeners: Vec<LimitsListener>,
    storage: Arc<dyn Storage>,
    audit: AuditTrail,
    notifier: Notifier,
}

impl LimitsRegistry {
    pub fn new(defaults: LimitDefaults, storage: Arc<dyn Storage>, audit: AuditTrail, notifier: Notifier) -> Self {
        LimitsRegistry {
            current: Arc::new(defaults),
            listeners: Vec::new(),
            storage,
            audit,
            notifier,
        }
    }

    /// Loads the stored defaults, falling back to the built-in values.
    pub fn load(storage: Arc<dyn Storage>, audit: AuditTrail, notifier: Notifier) -> Result<Self> {
        let defaults = match storage.load_limits()? {
            Some(defaults) => defaults,
            None => {
                log::info!(target: "wpmon::limits", "No stored limits, using built-in defaults");
                LimitDefaults::default()
            }
        };
        Ok(LimitsRegistry::new(defaults, storage, audit, notifier))
    }

    pub fn current(&self) -> Arc<LimitDefaults> {
        Arc::clone(&self.current)
    }

    pub fn get(&self, kind: MeasurementType) -> Limits {
        self.current.get(kind)
    }

    pub fn on_change(&mut self, listener: LimitsListener) {
        self.listeners.push(listener);
    }

    /// Replaces the limits of one type. Records already stored keep their snapshot.
    pub fn update(&mut self, limits: Limits) -> Result<()> {
        let kind = limits.kind();
        let changes = audit::diff(&self.current.get(kind), &limits)?;

        let mut next = *self.current;
        next.set(limits);
        self.current = Arc::new(next);

        self.audit.record(
            AuditEvent::new(AuditAction::Update, AuditEntity::Limit)
                .entity(kind.as_str())
                .changes(changes),
        );
        log::info!(target: "wpmon::limits", "Limits for '{}' updated", kind);

        if let Err(err) = self.storage.save_limits(&self.current) {
            log::error!(target: "wpmon::limits", "Could not save limits: '{}'", err);
            self.notifier.error(format!("Could not save limits: {}", err));
        }
        for listener in &self.listeners {
            listener(&self.current);
        }
        self.notifier.success(format!("Limits for {} updated", kind));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> (LimitsRegistry, Arc<MemoryStorage>, AuditTrail) {
        let storage = Arc::new(MemoryStorage::new());
        let audit = AuditTrail::new(storage.clone(), Notifier::silent(), "admin");
        (
            LimitsRegistry::new(LimitDefaults::default(), storage.clone(), audit.clone(), Notifier::silent()),
            storage,
            audit,
        )
    }

    #[test]
    fn get_and_set_address_the_same_type() {
        let mut defaults = LimitDefaults::default();
        for kind in MeasurementType::ALL.iter() {
            assert_eq!(defaults.get(*kind).kind(), *kind);
        }
        defaults.set(Limits::Torque(RangeLimits { min: 3.0, max: 7.0 }));
        assert_eq!(defaults.torque, RangeLimits { min: 3.0, max: 7.0 });
        assert_eq!(defaults.luminosity, LimitDefaults::default().luminosity);
    }

    #[test]
    fn stamp_replaces_snapshot() {
        let mut reading = Reading::Luminosity {
            luminosity: 450.0,
            limits: RangeLimits { min: 0.0, max: 0.0 },
        };
        LimitDefaults::default().stamp(&mut reading);
        assert_eq!(reading.limits(), Limits::Luminosity(RangeLimits { min: 500.0, max: 1000.0 }));
    }

    #[test]
    fn update_is_copy_on_write() {
        let (mut registry, storage, audit) = registry();
        let before = registry.current();

        registry
            .update(Limits::Luminosity(RangeLimits { min: 300.0, max: 800.0 }))
            .unwrap();

        assert_eq!(before.luminosity, RangeLimits { min: 500.0, max: 1000.0 });
        assert_eq!(registry.current().luminosity, RangeLimits { min: 300.0, max: 800.0 });
        assert_eq!(storage.load_limits().unwrap().unwrap().luminosity.min, 300.0);

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_type, AuditEntity::Limit);
        assert_eq!(entries[0].entity_id.as_deref(), Some("luminosity"));
        let changes = entries[0].changes.as_ref().unwrap();
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn listeners_see_new_defaults() {
        let (mut registry, _, _) = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        registry.on_change(Box::new(move |defaults: &LimitDefaults| {
            assert_eq!(defaults.ionizer.balance, 20.0);
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        registry
            .update(Limits::Ionizer(IonizerLimits {
                decay_time: 5.0,
                balance: 20.0,
            }))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_falls_back_to_builtin_defaults() {
        let storage = Arc::new(MemoryStorage::new());
        let audit = AuditTrail::new(storage.clone(), Notifier::silent(), "admin");
        let registry = LimitsRegistry::load(storage, audit, Notifier::silent()).unwrap();
        assert_eq!(*registry.current(), LimitDefaults::default());
    }

    #[test]
    fn current_defaults_classify_latest_reading() {
        let measurement = Measurement {
            id: String::from("lum1"),
            date: chrono::Utc::now(),
            location: String::from("Assembly Line 1"),
            device_id: None,
            notes: None,
            reading: Reading::Luminosity {
                luminosity: 450.0,
                limits: RangeLimits { min: 400.0, max: 1000.0 },
            },
        };
        assert!(!measurement.is_out_of_spec());
        assert!(LimitDefaults::default().is_out_of_spec(&measurement));
    }
}
