use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::error::AppError;
use crate::fare::RateCard;
use crate::geo::GeoPoint;
use crate::matching::{match_drivers, nearest_by_vehicle_type, Candidate};
use crate::models::booking::BookingView;
use crate::models::driver::Driver;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/nearby", get(nearby_drivers))
        .route("/drivers/nearest", get(nearest_drivers))
        .route("/drivers/:id/status", patch(update_status))
        .route("/drivers/:id/location", patch(update_location))
        .route("/drivers/:id/bookings/pending", get(pending_bookings))
        .route("/drivers/:id/bookings/current", get(current_booking))
        .route("/riders/:id/bookings/current", get(rider_current_booking))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub location: GeoPoint,
    pub vehicle_type: String,
    pub plate: Option<String>,
    pub rate_card: Option<RateCard>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub online: bool,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct NearestQuery {
    pub lat: f64,
    pub lng: f64,
    pub vehicle_type: String,
}

#[derive(Serialize)]
pub struct MatchedDriver {
    pub driver: Driver,
    pub distance_km: f64,
}

impl From<Candidate> for MatchedDriver {
    fn from(candidate: Candidate) -> Self {
        Self {
            driver: candidate.driver,
            distance_km: candidate.distance_km,
        }
    }
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "name cannot be empty".to_string(),
        ));
    }

    if payload.vehicle_type.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "vehicle_type cannot be empty".to_string(),
        ));
    }

    if let Some(rate) = &payload.rate_card {
        if rate.minimum_fare < 0.0 || rate.per_km_rate < 0.0 || rate.waiting_charge_per_minute < 0.0
        {
            return Err(AppError::InvalidArgument(
                "rate card cannot carry negative rates".to_string(),
            ));
        }
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        online: true,
        location: payload.location,
        busy_until: None,
        vehicle_type: payload.vehicle_type,
        plate: payload.plate,
        rate_card: payload
            .rate_card
            .unwrap_or_else(|| state.config.default_rate.clone()),
        rating: 5.0,
        updated_at: Utc::now(),
    };

    state.drivers.insert(driver.id, driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let drivers = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(drivers)
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    driver.online = payload.online;
    driver.updated_at = Utc::now();

    Ok(Json(driver.clone()))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    driver.location = payload.location;
    driver.updated_at = Utc::now();

    Ok(Json(driver.clone()))
}

/// Ambient-radius query: all matchable drivers around a point,
/// nearest first.
async fn nearby_drivers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Json<Vec<MatchedDriver>> {
    let pickup = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    let radius_km = query.radius_km.unwrap_or(state.config.offer_radius_km);

    let matched = match_drivers(
        &pickup,
        &state.matchable_drivers(),
        radius_km,
        &Default::default(),
    );

    Json(matched.into_iter().map(MatchedDriver::from).collect())
}

/// Ride-request query: the closest few drivers of one vehicle type,
/// within the tighter request radius.
async fn nearest_drivers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearestQuery>,
) -> Json<Vec<MatchedDriver>> {
    let pickup = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };

    let matched = nearest_by_vehicle_type(
        &pickup,
        &state.matchable_drivers(),
        state.config.request_radius_km,
        &query.vehicle_type,
        state.config.nearest_drivers_limit,
    );

    Json(matched.into_iter().map(MatchedDriver::from).collect())
}

async fn pending_bookings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    Ok(Json(lifecycle::pending_bookings_for_driver(&state, id)?))
}

async fn current_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingView>, AppError> {
    lifecycle::current_booking_for_driver(&state, id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} has no active booking")))
}

async fn rider_current_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingView>, AppError> {
    lifecycle::current_booking_for_rider(&state, id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("rider {id} has no active booking")))
}
