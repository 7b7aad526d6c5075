use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::geo::{haversine_km, GeoPoint};
use crate::models::driver::Driver;

/// One matched driver with the distance that ranked it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub driver: Driver,
    pub distance_km: f64,
}

/// Filters `pool` down to drivers eligible for a booking and ranks them
/// nearest-first. A driver qualifies when it is online, its busy window
/// (if any) has passed, it has not rejected the booking, and it sits
/// within `radius_km` of the pickup (boundary inclusive).
///
/// An empty result is a valid "no drivers available" outcome, not an
/// error; the booking stays pending for polling or eventual expiry.
pub fn match_drivers(
    pickup: &GeoPoint,
    pool: &[Driver],
    radius_km: f64,
    rejected: &HashSet<Uuid>,
) -> Vec<Candidate> {
    let now = Utc::now();

    let mut candidates: Vec<Candidate> = pool
        .iter()
        .filter(|driver| driver.is_matchable(now) && !rejected.contains(&driver.id))
        .filter_map(|driver| {
            let distance_km = haversine_km(pickup, &driver.location);
            (distance_km <= radius_km).then(|| Candidate {
                driver: driver.clone(),
                distance_km,
            })
        })
        .collect();

    candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    candidates
}

/// The explicit nearest-drivers query: same eligibility rules, further
/// intersected on vehicle type and truncated to the `limit` closest.
pub fn nearest_by_vehicle_type(
    pickup: &GeoPoint,
    pool: &[Driver],
    radius_km: f64,
    vehicle_type: &str,
    limit: usize,
) -> Vec<Candidate> {
    let mut candidates = match_drivers(pickup, pool, radius_km, &HashSet::new());
    candidates.retain(|candidate| candidate.driver.vehicle_type == vehicle_type);
    candidates.truncate(limit);
    candidates
}
