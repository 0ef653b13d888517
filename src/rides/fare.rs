use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const BASE_FARE: f64 = 1000.0;
const PER_KM: f64 = 500.0;
const PER_MINUTE: f64 = 100.0;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RideType {
    #[default]
    Basic,
    Pool,
    Premium,
}

impl RideType {
    pub fn multiplier(&self) -> f64 {
        match self {
            RideType::Basic => 1.0,
            RideType::Pool => 0.75,
            RideType::Premium => 1.5,
        }
    }
}

/// Quoted fare in whole currency units: base + distance + time, scaled by ride type.
pub fn estimate_fare(distance_km: f64, duration_min: f64, ride_type: RideType) -> AppResult<f64> {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return Err(AppError::Validation("distance must be a non-negative number".into()));
    }
    if !duration_min.is_finite() || duration_min < 0.0 {
        return Err(AppError::Validation("duration must be a non-negative number".into()));
    }
    let raw = BASE_FARE + distance_km * PER_KM + duration_min * PER_MINUTE;
    Ok((raw * ride_type.multiplier()).round())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_fare() {
        // 1000 + 2 km * 500 + 5 min * 100
        assert_eq!(estimate_fare(2.0, 5.0, RideType::Basic).unwrap(), 2500.0);
        assert_eq!(estimate_fare(0.0, 0.0, RideType::Basic).unwrap(), 1000.0);
    }

    #[test]
    fn ride_type_scales_and_rounds() {
        assert_eq!(estimate_fare(2.0, 5.0, RideType::Pool).unwrap(), 1875.0);
        assert_eq!(estimate_fare(2.0, 5.0, RideType::Premium).unwrap(), 3750.0);
        assert_eq!(estimate_fare(0.125, 0.0, RideType::Basic).unwrap(), 1063.0);
    }

    #[test]
    fn rejects_negative_or_nan() {
        assert!(estimate_fare(-1.0, 5.0, RideType::Basic).is_err());
        assert!(estimate_fare(1.0, f64::NAN, RideType::Basic).is_err());
    }
}
