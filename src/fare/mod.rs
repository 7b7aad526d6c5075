use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Per-driver rate structure. Different candidate drivers may carry
/// different cards, so the same trip quotes differently per candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateCard {
    pub minimum_fare: f64,
    pub per_km_rate: f64,
    pub waiting_charge_per_minute: f64,
}

/// Computes the fare for a trip, never below `rate.minimum_fare`.
///
/// `fare = max(minimum_fare, base_fare + distance_km * per_km_rate
///             + ceil(duration_secs / 60) * waiting_charge_per_minute)`
///
/// Partial waiting minutes bill in full. The same function prices
/// rider-facing estimates and per-driver quotes at dispatch time.
pub fn calculate_fare(
    distance_km: f64,
    duration_secs: u32,
    rate: &RateCard,
    base_fare: f64,
) -> Result<f64, AppError> {
    if distance_km < 0.0 {
        return Err(AppError::InvalidArgument(
            "distance cannot be negative".to_string(),
        ));
    }

    if rate.minimum_fare < 0.0 || rate.per_km_rate < 0.0 {
        return Err(AppError::InvalidArgument(
            "rate card cannot carry negative rates".to_string(),
        ));
    }

    let waiting_minutes = duration_secs.div_ceil(60) as f64;
    let metered =
        base_fare + distance_km * rate.per_km_rate + waiting_minutes * rate.waiting_charge_per_minute;

    Ok(metered.max(rate.minimum_fare))
}

/// Final-price precedence at booking creation: a positive rider-supplied
/// price is authoritative, else the computed fare, else the floor.
pub fn resolve_final_price(rider_price: Option<f64>, computed_fare: f64, minimum_fare: f64) -> f64 {
    match rider_price {
        Some(price) if price > 0.0 => price,
        _ if computed_fare > 0.0 => computed_fare,
        _ => minimum_fare,
    }
}
