//! ISO reference specifications, one per measurement type.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{self, AuditAction, AuditEntity, AuditEvent, AuditTrail};
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::record::MeasurementType;
use crate::storage::Storage;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IsoSpecification {
    pub measurement_type: MeasurementType,
    /// Standard identifier, e.g. "ISO 14644-1".
    pub iso_standard: String,
    pub standard_title: String,
    pub description: String,
    pub requirements: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testing_procedure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_document: Option<String>,
    pub last_updated: DateTime<Utc>,
}

fn builtin(
    measurement_type: MeasurementType,
    iso_standard: &str,
    standard_title: &str,
    description: &str,
    requirements: &str,
    testing_procedure: &str,
    reference_document: Option<&str>,
    now: DateTime<Utc>,
) -> IsoSpecification {
    IsoSpecification {
        measurement_type,
        iso_standard: iso_standard.to_string(),
        standard_title: standard_title.to_string(),
        description: description.to_string(),
        requirements: requirements.to_string(),
        testing_procedure: Some(testing_procedure.to_string()),
        reference_document: reference_document.map(str::to_string),
        last_updated: now,
    }
}

/// The specifications a fresh installation starts with.
pub fn default_specifications(now: DateTime<Utc>) -> Vec<IsoSpecification> {
    vec![
        builtin(
            MeasurementType::TemperatureHumidity,
            "ISO 9001",
            "Quality Management Systems",
            "Temperature and humidity control requirements for quality management",
            "Temperature: 15-30°C, Humidity: 30-70%",
            "Continuous monitoring with calibrated sensors",
            None,
            now,
        ),
        builtin(
            MeasurementType::DustinessIso6,
            "ISO 14644-1",
            "Cleanrooms - Classification of Air Cleanliness",
            "ISO Class 6 cleanroom particle concentration limits",
            "0.5µm particles: max 10,200 per m³, 5µm particles: max 2,930 per m³",
            "Particle counter measurements at designated locations",
            Some("ISO 14644-1:2015"),
            now,
        ),
        builtin(
            MeasurementType::DustinessIso5,
            "ISO 14644-1",
            "Cleanrooms - Classification of Air Cleanliness",
            "ISO Class 5 cleanroom particle concentration limits",
            "0.5µm particles: max 3,520 per m³, 5µm particles: max 293 per m³",
            "Particle counter measurements at designated locations",
            Some("ISO 14644-1:2015"),
            now,
        ),
        builtin(
            MeasurementType::Luminosity,
            "ISO 8995",
            "Lighting of Indoor Work Places",
            "Minimum illuminance requirements for workplaces",
            "Assembly work: 500-1000 lux",
            "Lux meter measurements at work surface level",
            None,
            now,
        ),
        builtin(
            MeasurementType::SurfaceResistance,
            "IEC 61340-5-1",
            "Protection of Electronic Devices - ESD",
            "Surface resistance requirements for ESD control",
            "Surface resistance: 1×10⁶ to 1×10⁹ Ω",
            "Two-point probe method or concentric ring method",
            None,
            now,
        ),
        builtin(
            MeasurementType::GroundingResistance,
            "IEC 61340-5-1",
            "Protection of Electronic Devices - ESD",
            "Grounding resistance requirements",
            "Grounding resistance: < 1.0 Ω",
            "Continuity test from ground point to equipment",
            None,
            now,
        ),
    ]
}

pub struct SpecificationCatalog {
    specifications: Arc<Vec<IsoSpecification>>,
    storage: Arc<dyn Storage>,
    audit: AuditTrail,
    notifier: Notifier,
}

impl SpecificationCatalog {
    pub fn new(
        specifications: Vec<IsoSpecification>,
        storage: Arc<dyn Storage>,
        audit: AuditTrail,
        notifier: Notifier,
    ) -> Self {
        SpecificationCatalog {
            specifications: Arc::new(specifications),
            storage,
            audit,
            notifier,
        }
    }

    /// Loads the stored catalog, or the built-in one if nothing was stored yet.
    pub fn load(storage: Arc<dyn Storage>, audit: AuditTrail, notifier: Notifier) -> Result<Self> {
        let specifications = match storage.load_specifications()? {
            Some(specifications) => specifications,
            None => default_specifications(Utc::now()),
        };
        Ok(SpecificationCatalog::new(specifications, storage, audit, notifier))
    }

    pub fn all(&self) -> Arc<Vec<IsoSpecification>> {
        Arc::clone(&self.specifications)
    }

    pub fn get(&self, kind: MeasurementType) -> Option<&IsoSpecification> {
        self.specifications
            .iter()
            .find(|specification| specification.measurement_type == kind)
    }

    /// Adds the specification of a type that has none yet.
    pub fn add(&mut self, specification: IsoSpecification) -> Result<()> {
        if self.get(specification.measurement_type).is_some() {
            return Err(Error::InvalidDocument(format!(
                "a specification for '{}' already exists",
                specification.measurement_type
            )));
        }
        self.upsert(specification)
    }

    /// Adds or wholesale replaces the specification of `specification.measurement_type`.
    /// `last_updated` is set to the current time.
    pub fn upsert(&mut self, mut specification: IsoSpecification) -> Result<()> {
        specification.last_updated = Utc::now();
        let kind = specification.measurement_type;

        let mut next: Vec<IsoSpecification> = self.specifications.as_ref().clone();
        let event = match next.iter().position(|existing| existing.measurement_type == kind) {
            Some(index) => {
                let changes = audit::diff(&next[index], &specification)?;
                next[index] = specification;
                AuditEvent::new(AuditAction::Update, AuditEntity::Specification)
                    .entity(kind.as_str())
                    .changes(changes)
            }
            None => {
                next.push(specification);
                AuditEvent::new(AuditAction::Create, AuditEntity::Specification).entity(kind.as_str())
            }
        };
        self.specifications = Arc::new(next);
        self.audit.record(event);
        self.persist();
        Ok(())
    }

    /// Removes the specification of `kind`. Returns the removed entry, `None` when absent.
    pub fn remove(&mut self, kind: MeasurementType) -> Option<IsoSpecification> {
        let removed = self.get(kind)?.clone();
        let next: Vec<IsoSpecification> = self
            .specifications
            .iter()
            .filter(|specification| specification.measurement_type != kind)
            .cloned()
            .collect();
        self.specifications = Arc::new(next);
        self.audit
            .record(AuditEvent::new(AuditAction::Delete, AuditEntity::Specification).entity(kind.as_str()));
        self.persist();
        Some(removed)
    }

    fn persist(&self) {
        match self.storage.save_specifications(&self.specifications) {
            Ok(_) => self.notifier.success("Specifications saved"),
            Err(err) => {
                log::error!(target: "wpmon::spec", "Could not save specifications: '{}'", err);
                self.notifier.error(format!("Could not save specifications: {}", err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn catalog() -> (SpecificationCatalog, AuditTrail) {
        let storage = Arc::new(MemoryStorage::new());
        let audit = AuditTrail::new(storage.clone(), Notifier::silent(), "admin");
        let catalog = SpecificationCatalog::load(storage, audit.clone(), Notifier::silent()).unwrap();
        (catalog, audit)
    }

    #[test]
    fn starts_with_builtin_catalog() {
        let (catalog, _) = catalog();
        assert_eq!(catalog.all().len(), 6);
        let iso6 = catalog.get(MeasurementType::DustinessIso6).unwrap();
        assert_eq!(iso6.iso_standard, "ISO 14644-1");
        assert_eq!(iso6.reference_document.as_deref(), Some("ISO 14644-1:2015"));
        assert!(catalog.get(MeasurementType::Torque).is_none());
    }

    #[test]
    fn upsert_replaces_wholesale() {
        let (mut catalog, audit) = catalog();
        let mut edited = catalog.get(MeasurementType::Luminosity).unwrap().clone();
        edited.requirements = String::from("Fine assembly: 750-1500 lux");
        edited.testing_procedure = None;
        catalog.upsert(edited).unwrap();

        let stored = catalog.get(MeasurementType::Luminosity).unwrap();
        assert_eq!(stored.requirements, "Fine assembly: 750-1500 lux");
        assert!(stored.testing_procedure.is_none());
        assert_eq!(catalog.all().len(), 6);
        assert_eq!(audit.entries()[0].action, AuditAction::Update);
    }

    #[test]
    fn upsert_of_unknown_type_adds() {
        let (mut catalog, audit) = catalog();
        let before = catalog.all();
        catalog
            .upsert(IsoSpecification {
                measurement_type: MeasurementType::Torque,
                iso_standard: String::from("ISO 6789"),
                standard_title: String::from("Hand torque tools"),
                description: String::from("Screwdriver torque verification"),
                requirements: String::from("4.0-6.0 Nm"),
                testing_procedure: None,
                reference_document: None,
                last_updated: Utc::now(),
            })
            .unwrap();
        assert_eq!(before.len(), 6);
        assert_eq!(catalog.all().len(), 7);
        assert_eq!(audit.entries()[0].action, AuditAction::Create);
    }

    #[test]
    fn add_refuses_existing_type() {
        let (mut catalog, audit) = catalog();
        let existing = catalog.get(MeasurementType::Luminosity).unwrap().clone();
        assert!(matches!(catalog.add(existing), Err(Error::InvalidDocument(_))));
        assert!(audit.entries().is_empty());
    }

    #[test]
    fn remove_drops_specification() {
        let (mut catalog, _) = catalog();
        assert!(catalog.remove(MeasurementType::GroundingResistance).is_some());
        assert!(catalog.get(MeasurementType::GroundingResistance).is_none());
        assert!(catalog.remove(MeasurementType::GroundingResistance).is_none());
    }
}
