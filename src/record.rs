//! Module that contains all valid record types for this application.
//!
//! A [`Measurement`] is a sample taken at a location at a specific timestamp. The sensor class
//! specific part lives in the closed [`Reading`] union, and every variant carries the limit
//! thresholds that were active when the record was created or last edited.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Discriminant of the eight supported sensor classes.
pub enum MeasurementType {
    #[serde(rename = "temperature_humidity")]
    TemperatureHumidity,
    #[serde(rename = "luminosity")]
    Luminosity,
    #[serde(rename = "dustiness_iso6")]
    DustinessIso6,
    #[serde(rename = "dustiness_iso5")]
    DustinessIso5,
    #[serde(rename = "torque")]
    Torque,
    #[serde(rename = "surface_resistance")]
    SurfaceResistance,
    #[serde(rename = "grounding_resistance")]
    GroundingResistance,
    #[serde(rename = "ionizer")]
    Ionizer,
}

impl MeasurementType {
    /// All types in dashboard order.
    pub const ALL: [MeasurementType; 8] = [
        MeasurementType::TemperatureHumidity,
        MeasurementType::Luminosity,
        MeasurementType::DustinessIso6,
        MeasurementType::DustinessIso5,
        MeasurementType::Torque,
        MeasurementType::SurfaceResistance,
        MeasurementType::GroundingResistance,
        MeasurementType::Ionizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::TemperatureHumidity => "temperature_humidity",
            MeasurementType::Luminosity => "luminosity",
            MeasurementType::DustinessIso6 => "dustiness_iso6",
            MeasurementType::DustinessIso5 => "dustiness_iso5",
            MeasurementType::Torque => "torque",
            MeasurementType::SurfaceResistance => "surface_resistance",
            MeasurementType::GroundingResistance => "grounding_resistance",
            MeasurementType::Ionizer => "ionizer",
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MeasurementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MeasurementType::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::validation("type", format!("unknown measurement type '{}'", s)))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
/// Inclusive `[min, max]` range used by the single valued sensor classes.
pub struct RangeLimits {
    pub min: f64,
    pub max: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Limits for combined temperature (celsius) and relative humidity (%) readings.
pub struct TemperatureHumidityLimits {
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
/// Particle count limits, shared by the ISO class 5 and class 6 dustiness readings.
pub struct ParticleLimits {
    pub particles_0_5um_min: f64,
    pub particles_0_5um_max: f64,
    pub particles_5um_min: f64,
    pub particles_5um_max: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Ionizer limits. Both values are upper bounds only.
pub struct IonizerLimits {
    /// Maximum decay time in seconds, applied to both polarities.
    pub decay_time: f64,
    /// Maximum offset voltage.
    pub balance: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "type", content = "limits")]
/// The limit record of one measurement type.
pub enum Limits {
    #[serde(rename = "temperature_humidity")]
    TemperatureHumidity(TemperatureHumidityLimits),
    #[serde(rename = "luminosity")]
    Luminosity(RangeLimits),
    #[serde(rename = "dustiness_iso6")]
    DustinessIso6(ParticleLimits),
    #[serde(rename = "dustiness_iso5")]
    DustinessIso5(ParticleLimits),
    #[serde(rename = "torque")]
    Torque(RangeLimits),
    #[serde(rename = "surface_resistance")]
    SurfaceResistance(RangeLimits),
    #[serde(rename = "grounding_resistance")]
    GroundingResistance(RangeLimits),
    #[serde(rename = "ionizer")]
    Ionizer(IonizerLimits),
}

impl Limits {
    pub fn kind(&self) -> MeasurementType {
        match self {
            Limits::TemperatureHumidity(_) => MeasurementType::TemperatureHumidity,
            Limits::Luminosity(_) => MeasurementType::Luminosity,
            Limits::DustinessIso6(_) => MeasurementType::DustinessIso6,
            Limits::DustinessIso5(_) => MeasurementType::DustinessIso5,
            Limits::Torque(_) => MeasurementType::Torque,
            Limits::SurfaceResistance(_) => MeasurementType::SurfaceResistance,
            Limits::GroundingResistance(_) => MeasurementType::GroundingResistance,
            Limits::Ionizer(_) => MeasurementType::Ionizer,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
/// Sensor class specific values of a measurement, together with its limits snapshot.
pub enum Reading {
    #[serde(rename = "temperature_humidity")]
    TemperatureHumidity {
        /// Celsius.
        temperature: f64,
        /// Relative humidity in percent.
        humidity: f64,
        limits: TemperatureHumidityLimits,
    },
    #[serde(rename = "luminosity")]
    Luminosity {
        /// Lux.
        luminosity: f64,
        limits: RangeLimits,
    },
    #[serde(rename = "dustiness_iso6")]
    DustinessIso6 {
        particles_0_5um: f64,
        particles_5um: f64,
        limits: ParticleLimits,
    },
    #[serde(rename = "dustiness_iso5")]
    DustinessIso5 {
        particles_0_5um: f64,
        particles_5um: f64,
        limits: ParticleLimits,
    },
    #[serde(rename = "torque", rename_all = "camelCase")]
    Torque {
        screwdriver_id: String,
        /// Nm.
        torque_value: f64,
        limits: RangeLimits,
    },
    #[serde(rename = "surface_resistance")]
    SurfaceResistance {
        material: String,
        /// Ohm.
        resistance: f64,
        limits: RangeLimits,
    },
    #[serde(rename = "grounding_resistance", rename_all = "camelCase")]
    GroundingResistance {
        point_id: String,
        /// Ohm.
        resistance: f64,
        limits: RangeLimits,
    },
    #[serde(rename = "ionizer", rename_all = "camelCase")]
    Ionizer {
        ionizer_id: String,
        /// Seconds.
        decay_time_positive: f64,
        /// Seconds.
        decay_time_negative: f64,
        /// Volts.
        balance: f64,
        limits: IonizerLimits,
    },
}

impl Reading {
    pub fn kind(&self) -> MeasurementType {
        match self {
            Reading::TemperatureHumidity { .. } => MeasurementType::TemperatureHumidity,
            Reading::Luminosity { .. } => MeasurementType::Luminosity,
            Reading::DustinessIso6 { .. } => MeasurementType::DustinessIso6,
            Reading::DustinessIso5 { .. } => MeasurementType::DustinessIso5,
            Reading::Torque { .. } => MeasurementType::Torque,
            Reading::SurfaceResistance { .. } => MeasurementType::SurfaceResistance,
            Reading::GroundingResistance { .. } => MeasurementType::GroundingResistance,
            Reading::Ionizer { .. } => MeasurementType::Ionizer,
        }
    }

    /// The limits snapshot stored on this reading.
    pub fn limits(&self) -> Limits {
        match self {
            Reading::TemperatureHumidity { limits, .. } => Limits::TemperatureHumidity(*limits),
            Reading::Luminosity { limits, .. } => Limits::Luminosity(*limits),
            Reading::DustinessIso6 { limits, .. } => Limits::DustinessIso6(*limits),
            Reading::DustinessIso5 { limits, .. } => Limits::DustinessIso5(*limits),
            Reading::Torque { limits, .. } => Limits::Torque(*limits),
            Reading::SurfaceResistance { limits, .. } => Limits::SurfaceResistance(*limits),
            Reading::GroundingResistance { limits, .. } => Limits::GroundingResistance(*limits),
            Reading::Ionizer { limits, .. } => Limits::Ionizer(*limits),
        }
    }

    /// Short human readable rendering of the measured values.
    pub fn value_label(&self) -> String {
        match self {
            Reading::TemperatureHumidity {
                temperature,
                humidity,
                ..
            } => format!("{}°C / {}%", temperature, humidity),
            Reading::Luminosity { luminosity, .. } => format!("{} lx", luminosity),
            Reading::DustinessIso6 {
                particles_0_5um,
                particles_5um,
                ..
            }
            | Reading::DustinessIso5 {
                particles_0_5um,
                particles_5um,
                ..
            } => format!("0.5µm: {} / 5µm: {}", particles_0_5um, particles_5um),
            Reading::Torque { torque_value, .. } => format!("{} Nm", torque_value),
            Reading::SurfaceResistance { resistance, .. } => format!("{:.1e} Ω", resistance),
            Reading::GroundingResistance { resistance, .. } => format!("{} Ω", resistance),
            Reading::Ionizer { balance, .. } => format!("Balance: {}V", balance),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
/// A stored measurement.
pub struct Measurement {
    /// Opaque unique identifier, assigned by the store.
    pub id: String,
    /// Timestamp the measurement was taken.
    pub date: DateTime<Utc>,
    /// Free text location, e.g. the name of an assembly line.
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub reading: Reading,
}

impl Measurement {
    pub fn kind(&self) -> MeasurementType {
        self.reading.kind()
    }

    /// Everything but the identifier, e.g. to prefill an edit.
    pub fn to_draft(&self) -> NewMeasurement {
        NewMeasurement {
            date: self.date,
            location: self.location.clone(),
            device_id: self.device_id.clone(),
            notes: self.notes.clone(),
            reading: self.reading.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
/// A measurement that has not been assigned an identifier yet.
pub struct NewMeasurement {
    pub date: DateTime<Utc>,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub reading: Reading,
}

impl NewMeasurement {
    pub fn kind(&self) -> MeasurementType {
        self.reading.kind()
    }

    pub fn into_measurement(self, id: String) -> Measurement {
        Measurement {
            id,
            date: self.date,
            location: self.location,
            device_id: self.device_id,
            notes: self.notes,
            reading: self.reading,
        }
    }
}
