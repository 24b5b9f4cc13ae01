//! Required field and range checks applied before a record reaches the store.
use crate::error::{Error, Result};
use crate::record::{NewMeasurement, Reading};

fn finite(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::validation(field, "must be a finite number"))
    }
}

fn within(field: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    finite(field, value)?;
    if value < min || value > max {
        return Err(Error::validation(field, format!("must be between {} and {}", min, max)));
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f64) -> Result<()> {
    within(field, value, 0.0, f64::MAX)
}

fn required(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::validation(field, "is required"))
    } else {
        Ok(())
    }
}

pub fn validate(draft: &NewMeasurement) -> Result<()> {
    required("location", &draft.location)?;
    match &draft.reading {
        Reading::TemperatureHumidity {
            temperature,
            humidity,
            ..
        } => {
            within("temperature", *temperature, -50.0, 100.0)?;
            within("humidity", *humidity, 0.0, 100.0)
        }
        Reading::Luminosity { luminosity, .. } => non_negative("luminosity", *luminosity),
        Reading::DustinessIso6 {
            particles_0_5um,
            particles_5um,
            ..
        }
        | Reading::DustinessIso5 {
            particles_0_5um,
            particles_5um,
            ..
        } => {
            non_negative("particles_0_5um", *particles_0_5um)?;
            non_negative("particles_5um", *particles_5um)
        }
        Reading::Torque {
            screwdriver_id,
            torque_value,
            ..
        } => {
            required("screwdriverId", screwdriver_id)?;
            non_negative("torqueValue", *torque_value)
        }
        Reading::SurfaceResistance {
            material,
            resistance,
            ..
        } => {
            required("material", material)?;
            non_negative("resistance", *resistance)
        }
        Reading::GroundingResistance {
            point_id,
            resistance,
            ..
        } => {
            required("pointId", point_id)?;
            non_negative("resistance", *resistance)
        }
        Reading::Ionizer {
            ionizer_id,
            decay_time_positive,
            decay_time_negative,
            balance,
            ..
        } => {
            required("ionizerId", ionizer_id)?;
            non_negative("decayTimePositive", *decay_time_positive)?;
            non_negative("decayTimeNegative", *decay_time_negative)?;
            finite("balance", *balance)
        }
    }
}
