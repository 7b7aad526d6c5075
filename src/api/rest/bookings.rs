use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::lifecycle::{self, CreateBooking};
use crate::error::AppError;
use crate::fare::calculate_fare;
use crate::geo::GeoPoint;
use crate::models::booking::{Booking, BookingView, CancelledBy};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/accept", post(accept))
        .route("/bookings/:id/reject", post(reject))
        .route("/bookings/:id/arrived", post(arrived))
        .route("/bookings/:id/start", post(start))
        .route("/bookings/:id/complete", post(complete))
        .route("/bookings/:id/cancel", post(cancel))
        .route("/bookings/:id/rate", post(rate))
        .route("/fare/estimate", get(fare_estimate))
}

#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub rider_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub distance_m: f64,
    #[serde(default)]
    pub duration_secs: u32,
    pub offered_price: Option<f64>,
    pub payment_method: Option<String>,
    pub vehicle_type: Option<String>,
    pub driver_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct StartRideRequest {
    pub driver_id: Uuid,
    pub otp: String,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub cancelled_by: CancelledBy,
    pub actor_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub rider_id: Uuid,
    pub score: u8,
    pub feedback: Option<String>,
}

#[derive(Deserialize)]
pub struct ViewQuery {
    pub driver_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct EstimateQuery {
    pub distance_m: f64,
    #[serde(default)]
    pub duration_secs: u32,
    /// Quote against this driver's rate card instead of the default one.
    pub driver_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct FareEstimate {
    pub distance_km: f64,
    pub duration_secs: u32,
    pub fare: f64,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = lifecycle::create_booking(
        &state,
        CreateBooking {
            rider_id: payload.rider_id,
            pickup: payload.pickup,
            dropoff: payload.dropoff,
            pickup_location: payload.pickup_location,
            dropoff_location: payload.dropoff_location,
            distance_m: payload.distance_m,
            duration_secs: payload.duration_secs,
            offered_price: payload.offered_price,
            payment_method: payload.payment_method.unwrap_or_else(|| "cash".to_string()),
            vehicle_type: payload.vehicle_type,
            driver_id: payload.driver_id,
        },
    )
    .await?;

    Ok(Json(booking))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(lifecycle::booking_view(&state, id, query.driver_id)?))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(
        lifecycle::accept_booking(&state, id, payload.driver_id).await?,
    ))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(
        lifecycle::reject_booking(&state, id, payload.driver_id).await?,
    ))
}

async fn arrived(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(
        lifecycle::driver_arrived(&state, id, payload.driver_id).await?,
    ))
}

async fn start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartRideRequest>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(
        lifecycle::verify_otp_and_start(&state, id, payload.driver_id, &payload.otp).await?,
    ))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(
        lifecycle::complete_booking(&state, id, payload.driver_id).await?,
    ))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<BookingView>, AppError> {
    if payload.cancelled_by == CancelledBy::System {
        return Err(AppError::InvalidArgument(
            "cancelled_by must be User or Driver".to_string(),
        ));
    }

    let reason = payload
        .reason
        .unwrap_or_else(|| "cancelled by request".to_string());

    Ok(Json(
        lifecycle::cancel_booking(&state, id, payload.cancelled_by, payload.actor_id, reason)
            .await?,
    ))
}

async fn rate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RateRequest>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(
        lifecycle::rate_booking(&state, id, payload.rider_id, payload.score, payload.feedback)
            .await?,
    ))
}

async fn fare_estimate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EstimateQuery>,
) -> Result<Json<FareEstimate>, AppError> {
    let rate = match query.driver_id {
        Some(driver_id) => state
            .drivers
            .get(&driver_id)
            .map(|d| d.rate_card.clone())
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?,
        None => state.config.default_rate.clone(),
    };

    let distance_km = query.distance_m / 1000.0;
    let fare = calculate_fare(distance_km, query.duration_secs, &rate, 0.0)?;

    Ok(Json(FareEstimate {
        distance_km,
        duration_secs: query.duration_secs,
        fare,
    }))
}
