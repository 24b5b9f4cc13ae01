//! Out of spec classification and primary value extraction.
use crate::record::{
    IonizerLimits, Limits, Measurement, ParticleLimits, RangeLimits, Reading,
    TemperatureHumidityLimits,
};

impl RangeLimits {
    /// Bounds are inclusive, a value exactly at `min` or `max` is in spec.
    pub fn excludes(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}

impl TemperatureHumidityLimits {
    pub fn excludes(&self, temperature: f64, humidity: f64) -> bool {
        temperature < self.temperature_min
            || temperature > self.temperature_max
            || humidity < self.humidity_min
            || humidity > self.humidity_max
    }
}

impl ParticleLimits {
    pub fn excludes(&self, particles_0_5um: f64, particles_5um: f64) -> bool {
        particles_0_5um < self.particles_0_5um_min
            || particles_0_5um > self.particles_0_5um_max
            || particles_5um < self.particles_5um_min
            || particles_5um > self.particles_5um_max
    }
}

impl IonizerLimits {
    /// Upper bounds only: a low balance or a fast decay is never a violation.
    pub fn excludes(&self, decay_time_positive: f64, decay_time_negative: f64, balance: f64) -> bool {
        balance > self.balance
            || decay_time_positive > self.decay_time
            || decay_time_negative > self.decay_time
    }
}

/// Classifies `reading` against `limits`.
///
/// # Panics
///
/// If `limits` does not belong to the type of `reading`. Use [`Measurement::is_out_of_spec`] or
/// [`crate::limits::LimitDefaults::is_out_of_spec`] to get a matching pair by construction.
pub fn is_out_of_spec(reading: &Reading, limits: &Limits) -> bool {
    match (reading, limits) {
        (
            Reading::TemperatureHumidity {
                temperature,
                humidity,
                ..
            },
            Limits::TemperatureHumidity(limits),
        ) => limits.excludes(*temperature, *humidity),
        (Reading::Luminosity { luminosity, .. }, Limits::Luminosity(limits)) => {
            limits.excludes(*luminosity)
        }
        (
            Reading::DustinessIso6 {
                particles_0_5um,
                particles_5um,
                ..
            },
            Limits::DustinessIso6(limits),
        )
        | (
            Reading::DustinessIso5 {
                particles_0_5um,
                particles_5um,
                ..
            },
            Limits::DustinessIso5(limits),
        ) => limits.excludes(*particles_0_5um, *particles_5um),
        (Reading::Torque { torque_value, .. }, Limits::Torque(limits)) => {
            limits.excludes(*torque_value)
        }
        (Reading::SurfaceResistance { resistance, .. }, Limits::SurfaceResistance(limits))
        | (Reading::GroundingResistance { resistance, .. }, Limits::GroundingResistance(limits)) => {
            limits.excludes(*resistance)
        }
        (
            Reading::Ionizer {
                decay_time_positive,
                decay_time_negative,
                balance,
                ..
            },
            Limits::Ionizer(limits),
        ) => limits.excludes(*decay_time_positive, *decay_time_negative, *balance),
        (reading, limits) => panic!(
            "limits of type '{}' applied to a '{}' reading",
            limits.kind(),
            reading.kind()
        ),
    }
}

/// The representative scalar of a reading, used for averages, trends and sorting.
///
/// The choice per type is fixed: temperature (humidity is ignored), luminosity, the mean of
/// both particle counts, the torque value, the resistance and the ionizer balance (decay
/// times are ignored).
pub fn primary_value(reading: &Reading) -> f64 {
    match reading {
        Reading::TemperatureHumidity { temperature, .. } => *temperature,
        Reading::Luminosity { luminosity, .. } => *luminosity,
        Reading::DustinessIso6 {
            particles_0_5um,
            particles_5um,
            ..
        }
        | Reading::DustinessIso5 {
            particles_0_5um,
            particles_5um,
            ..
        } => (particles_0_5um + particles_5um) / 2.0,
        Reading::Torque { torque_value, .. } => *torque_value,
        Reading::SurfaceResistance { resistance, .. }
        | Reading::GroundingResistance { resistance, .. } => *resistance,
        Reading::Ionizer { balance, .. } => *balance,
    }
}

impl Measurement {
    /// Classifies the measurement against the limits snapshot stored on it.
    pub fn is_out_of_spec(&self) -> bool {
        is_out_of_spec(&self.reading, &self.reading.limits())
    }

    pub fn primary_value(&self) -> f64 {
        primary_value(&self.reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temperature_humidity(temperature: f64, humidity: f64) -> Reading {
        Reading::TemperatureHumidity {
            temperature,
            humidity,
            limits: TemperatureHumidityLimits {
                temperature_min: 15.0,
                temperature_max: 30.0,
                humidity_min: 30.0,
                humidity_max: 70.0,
            },
        }
    }

    fn iso6(particles_0_5um: f64, particles_5um: f64) -> Reading {
        Reading::DustinessIso6 {
            particles_0_5um,
            particles_5um,
            limits: ParticleLimits {
                particles_0_5um_min: 0.0,
                particles_0_5um_max: 10200.0,
                particles_5um_min: 0.0,
                particles_5um_max: 2930.0,
            },
        }
    }

    fn ionizer(positive: f64, negative: f64, balance: f64) -> Reading {
        Reading::Ionizer {
            ionizer_id: String::from("ION-03"),
            decay_time_positive: positive,
            decay_time_negative: negative,
            balance,
            limits: IonizerLimits {
                decay_time: 5.0,
                balance: 35.0,
            },
        }
    }

    fn own(reading: &Reading) -> bool {
        is_out_of_spec(reading, &reading.limits())
    }

    #[test]
    fn temperature_above_max_is_out_of_spec() {
        assert!(own(&temperature_humidity(31.0, 50.0)));
        assert!(!own(&temperature_humidity(30.0, 50.0)));
        assert!(!own(&temperature_humidity(15.0, 30.0)));
        assert!(own(&temperature_humidity(20.0, 70.5)));
    }

    #[test]
    fn dustiness_at_max_is_in_spec() {
        assert!(!own(&iso6(10200.0, 2930.0)));
        assert!(own(&iso6(10201.0, 2930.0)));
        assert!(own(&iso6(10200.0, 2931.0)));
    }

    #[test]
    fn ionizer_has_no_lower_bounds() {
        assert!(!own(&ionizer(0.0, 0.0, 0.0)));
        assert!(!own(&ionizer(5.0, 5.0, 35.0)));
        assert!(!own(&ionizer(1.0, 1.0, -120.0)));
        assert!(own(&ionizer(5.1, 1.0, 10.0)));
        assert!(own(&ionizer(1.0, 5.1, 10.0)));
        assert!(own(&ionizer(1.0, 1.0, 35.5)));
    }

    #[test]
    fn classifies_against_foreign_limits_of_same_type() {
        let reading = Reading::Luminosity {
            luminosity: 450.0,
            limits: RangeLimits {
                min: 400.0,
                max: 1000.0,
            },
        };
        assert!(!own(&reading));
        assert!(is_out_of_spec(
            &reading,
            &Limits::Luminosity(RangeLimits {
                min: 500.0,
                max: 1000.0
            })
        ));
    }

    #[test]
    #[should_panic]
    fn mismatched_limits_panic() {
        is_out_of_spec(
            &temperature_humidity(20.0, 40.0),
            &Limits::Torque(RangeLimits { min: 4.0, max: 6.0 }),
        );
    }

    #[test]
    fn primary_values_follow_policy() {
        assert_eq!(primary_value(&temperature_humidity(21.5, 60.0)), 21.5);
        assert_eq!(primary_value(&iso6(100.0, 50.0)), 75.0);
        assert_eq!(primary_value(&ionizer(4.0, 4.5, 12.0)), 12.0);
        let grounding = Reading::GroundingResistance {
            point_id: String::from("GP-01"),
            resistance: 0.8,
            limits: RangeLimits { min: 0.0, max: 1.0 },
        };
        assert_eq!(primary_value(&grounding), 0.8);
    }
}
