use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::dispatch::{enqueue_job, DispatchJob};
use crate::error::AppError;
use crate::fare::{calculate_fare, resolve_final_price};
use crate::geo::{haversine_km, GeoPoint};
use crate::models::booking::{
    Booking, BookingStatus, BookingView, CancellationInfo, CancelledBy, DriverSnapshot, Rating,
    StatusChange,
};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub rider_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub distance_m: f64,
    pub duration_secs: u32,
    /// Rider-supplied total price; authoritative when positive.
    pub offered_price: Option<f64>,
    pub payment_method: String,
    pub vehicle_type: Option<String>,
    /// Pre-selected driver; when set, no fanout and no expiry timer.
    pub driver_id: Option<Uuid>,
}

/// Creates a booking in `Pending` and, when no driver was pre-selected,
/// arms the expiry window and hands the offer fanout to the dispatch
/// engine. The fanout is a side effect; its failure never fails creation.
pub async fn create_booking(state: &AppState, req: CreateBooking) -> Result<Booking, AppError> {
    validate_point(&req.pickup, "pickup")?;
    validate_point(&req.dropoff, "dropoff")?;

    if req.distance_m <= 0.0 {
        return Err(AppError::InvalidArgument(
            "distance must be positive".to_string(),
        ));
    }

    if let Some(driver_id) = req.driver_id {
        if !state.drivers.contains_key(&driver_id) {
            return Err(AppError::NotFound(format!("driver {driver_id} not found")));
        }
    }

    let fare = calculate_fare(
        req.distance_m / 1000.0,
        req.duration_secs,
        &state.config.default_rate,
        0.0,
    )?;
    let final_price =
        resolve_final_price(req.offered_price, fare, state.config.default_rate.minimum_fare);

    let now = Utc::now();
    let expires_at = req
        .driver_id
        .is_none()
        .then(|| now + Duration::seconds(state.config.booking_expiry_secs));

    let booking = Booking {
        id: Uuid::new_v4(),
        rider_id: req.rider_id,
        driver_id: None,
        driver: None,
        pickup: req.pickup,
        dropoff: req.dropoff,
        pickup_location: req.pickup_location,
        dropoff_location: req.dropoff_location,
        distance_m: req.distance_m,
        duration_secs: req.duration_secs,
        fare,
        final_price,
        payment_method: req.payment_method,
        payment_completed: false,
        ride_otp: generate_otp(state.config.otp_length),
        otp_verified: false,
        status: BookingStatus::Pending,
        history: vec![StatusChange {
            status: BookingStatus::Pending,
            at: now,
            actor: req.rider_id.to_string(),
            note: Some("booking created".to_string()),
        }],
        rejected_drivers: Default::default(),
        cancellation: None,
        rating: None,
        vehicle_type: req.vehicle_type,
        expires_at,
        created_at: now,
        started_at: None,
        ended_at: None,
    };

    state.bookings.insert(booking.id, booking.clone());
    state
        .metrics
        .bookings_total
        .with_label_values(&["created"])
        .inc();

    info!(booking_id = %booking.id, rider_id = %booking.rider_id, fare, final_price, "booking created");

    match req.driver_id {
        // A pre-selected driver gets the offer directly; no fanout.
        Some(driver_id) => {
            offer_to_driver(state, &booking, driver_id);
        }
        None => {
            if enqueue_job(state, DispatchJob::OfferBooking { booking_id: booking.id })
                .await
                .is_err()
            {
                warn!(booking_id = %booking.id, "offer fanout could not be queued; drivers must poll");
            }
        }
    }

    Ok(booking)
}

/// Pending -> Accepted. Records the driver and a vehicle snapshot, then
/// tells other connected drivers the offer is closed.
pub async fn accept_booking(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<BookingView, AppError> {
    let lock = state.booking_lock(booking_id);
    let _guard = lock.lock().await;

    let driver = state
        .drivers
        .get(&driver_id)
        .map(|d| d.clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    let mut booking = load_booking(state, booking_id)?;

    if booking.status != BookingStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "booking is {:?}, not open for acceptance",
            booking.status
        )));
    }

    if booking.rejected_drivers.contains(&driver_id) {
        return Err(AppError::Forbidden(
            "driver has already rejected this booking".to_string(),
        ));
    }

    booking.driver_id = Some(driver_id);
    booking.driver = Some(DriverSnapshot {
        driver_id,
        name: driver.name.clone(),
        vehicle_type: driver.vehicle_type.clone(),
        plate: driver.plate.clone(),
    });
    booking.record_transition(BookingStatus::Accepted, &driver_id.to_string(), None);
    state.bookings.insert(booking_id, booking.clone());

    state
        .metrics
        .bookings_total
        .with_label_values(&["accepted"])
        .inc();
    info!(booking_id = %booking_id, driver_id = %driver_id, "booking accepted");

    let _ = enqueue_job(
        state,
        DispatchJob::CloseOffer {
            booking_id,
            accepted_driver: Some(driver_id),
            reason: "accepted by another driver".to_string(),
        },
    )
    .await;

    Ok(BookingView::for_driver(&booking))
}

/// A driver declines a booking. For a bystander driver this only grows
/// the rejection set and starts their busy window; the booking itself
/// does not move. The assigned driver backing out reverts the booking to
/// `Pending` and re-enters it into matching.
pub async fn reject_booking(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<BookingView, AppError> {
    let lock = state.booking_lock(booking_id);
    let _guard = lock.lock().await;

    let mut booking = load_booking(state, booking_id)?;

    if booking.status.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "booking is already {:?}",
            booking.status
        )));
    }

    booking.rejected_drivers.insert(driver_id);
    mark_driver_busy(state, driver_id);

    let was_assigned = booking.driver_id == Some(driver_id);
    if was_assigned {
        booking.driver_id = None;
        booking.driver = None;
        booking.record_transition(
            BookingStatus::Pending,
            &driver_id.to_string(),
            Some("assigned driver backed out".to_string()),
        );
        if booking.expires_at.is_none() {
            // A pre-selected booking never had a window; it is unclaimed now.
            booking.expires_at =
                Some(Utc::now() + Duration::seconds(state.config.booking_expiry_secs));
        }
    }

    state.bookings.insert(booking_id, booking.clone());
    state
        .metrics
        .bookings_total
        .with_label_values(&["rejected"])
        .inc();
    info!(booking_id = %booking_id, driver_id = %driver_id, was_assigned, "booking rejected by driver");

    if was_assigned {
        let _ = enqueue_job(state, DispatchJob::OfferBooking { booking_id }).await;
    }

    Ok(BookingView::for_driver(&booking))
}

/// Accepted -> DriverArrived. Only the assigned driver may report arrival.
pub async fn driver_arrived(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<BookingView, AppError> {
    let lock = state.booking_lock(booking_id);
    let _guard = lock.lock().await;

    let mut booking = load_booking(state, booking_id)?;
    ensure_assigned(&booking, driver_id)?;

    if booking.status != BookingStatus::Accepted {
        return Err(AppError::InvalidState(format!(
            "cannot mark arrival while booking is {:?}",
            booking.status
        )));
    }

    booking.record_transition(BookingStatus::DriverArrived, &driver_id.to_string(), None);
    state.bookings.insert(booking_id, booking.clone());

    info!(booking_id = %booking_id, driver_id = %driver_id, "driver arrived at pickup");
    Ok(BookingView::for_driver(&booking))
}

/// DriverArrived -> InProgress, gated on the rider's OTP. A correct code
/// flips `otp_verified`, stamps the start time, and unlocks drop-off
/// detail in the same transition. A wrong code changes nothing.
pub async fn verify_otp_and_start(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
    otp: &str,
) -> Result<BookingView, AppError> {
    let lock = state.booking_lock(booking_id);
    let _guard = lock.lock().await;

    let mut booking = load_booking(state, booking_id)?;
    ensure_assigned(&booking, driver_id)?;

    if booking.status != BookingStatus::DriverArrived {
        return Err(AppError::InvalidState(format!(
            "cannot verify OTP while booking is {:?}",
            booking.status
        )));
    }

    if otp.is_empty() || !otp.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidArgument("Invalid OTP".to_string()));
    }

    if otp != booking.ride_otp {
        return Err(AppError::InvalidArgument("Invalid OTP".to_string()));
    }

    booking.otp_verified = true;
    booking.started_at = Some(Utc::now());
    booking.record_transition(BookingStatus::InProgress, &driver_id.to_string(), None);
    state.bookings.insert(booking_id, booking.clone());

    state
        .metrics
        .bookings_total
        .with_label_values(&["started"])
        .inc();
    info!(booking_id = %booking_id, driver_id = %driver_id, "OTP verified, ride started");

    Ok(BookingView::for_driver(&booking))
}

/// InProgress -> Completed. Stamps the end time, marks payment complete,
/// and freezes the booking for rating.
pub async fn complete_booking(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<BookingView, AppError> {
    let lock = state.booking_lock(booking_id);
    let _guard = lock.lock().await;

    let mut booking = load_booking(state, booking_id)?;
    ensure_assigned(&booking, driver_id)?;

    if booking.status != BookingStatus::InProgress {
        return Err(AppError::InvalidState(format!(
            "cannot complete a booking that is {:?}",
            booking.status
        )));
    }

    booking.ended_at = Some(Utc::now());
    booking.payment_completed = true;
    booking.record_transition(BookingStatus::Completed, &driver_id.to_string(), None);
    state.bookings.insert(booking_id, booking.clone());

    state
        .metrics
        .bookings_total
        .with_label_values(&["completed"])
        .inc();
    info!(booking_id = %booking_id, driver_id = %driver_id, "ride completed");

    Ok(BookingView::for_driver(&booking))
}

/// Any non-terminal state -> Cancelled. Riders may cancel their own
/// booking at any point before completion; the assigned driver may cancel
/// and picks up a busy-window penalty for it.
pub async fn cancel_booking(
    state: &AppState,
    booking_id: Uuid,
    cancelled_by: CancelledBy,
    actor_id: Uuid,
    reason: String,
) -> Result<BookingView, AppError> {
    let lock = state.booking_lock(booking_id);
    let _guard = lock.lock().await;

    let mut booking = load_booking(state, booking_id)?;

    if booking.status.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "booking is already {:?}",
            booking.status
        )));
    }

    let driver_id = match cancelled_by {
        CancelledBy::User => {
            if booking.rider_id != actor_id {
                return Err(AppError::Forbidden(
                    "only the booking's rider may cancel it".to_string(),
                ));
            }
            booking.driver_id
        }
        CancelledBy::Driver => {
            ensure_assigned(&booking, actor_id)?;
            mark_driver_busy(state, actor_id);
            Some(actor_id)
        }
        CancelledBy::System => booking.driver_id,
    };

    booking.cancellation = Some(CancellationInfo {
        cancelled_by,
        driver_id,
        reason: reason.clone(),
        at: Utc::now(),
    });
    booking.record_transition(BookingStatus::Cancelled, &actor_id.to_string(), Some(reason.clone()));
    state.bookings.insert(booking_id, booking.clone());

    state
        .metrics
        .bookings_total
        .with_label_values(&["cancelled"])
        .inc();
    info!(booking_id = %booking_id, ?cancelled_by, "booking cancelled");

    // The assigned driver hears about a rider cancellation by push.
    if cancelled_by == CancelledBy::User {
        if let Some(assigned) = driver_id {
            let _ = enqueue_job(
                state,
                DispatchJob::NotifyCancelled {
                    booking_id,
                    driver_id: assigned,
                    cancelled_by,
                    reason,
                },
            )
            .await;
        }
    }

    Ok(BookingView::for_rider(&booking))
}

/// One rating per completed booking, by its rider.
pub async fn rate_booking(
    state: &AppState,
    booking_id: Uuid,
    rider_id: Uuid,
    score: u8,
    feedback: Option<String>,
) -> Result<BookingView, AppError> {
    if !(1..=5).contains(&score) {
        return Err(AppError::InvalidArgument(
            "rating score must be between 1 and 5".to_string(),
        ));
    }

    let lock = state.booking_lock(booking_id);
    let _guard = lock.lock().await;

    let mut booking = load_booking(state, booking_id)?;

    if booking.rider_id != rider_id {
        return Err(AppError::Forbidden(
            "only the booking's rider may rate it".to_string(),
        ));
    }

    if booking.status != BookingStatus::Completed {
        return Err(AppError::InvalidState(
            "only completed bookings can be rated".to_string(),
        ));
    }

    if booking.rating.is_some() {
        return Err(AppError::InvalidState(
            "booking has already been rated".to_string(),
        ));
    }

    booking.rating = Some(Rating {
        score,
        feedback,
        rated_at: Utc::now(),
    });
    state.bookings.insert(booking_id, booking.clone());

    info!(booking_id = %booking_id, score, "booking rated");
    Ok(BookingView::for_rider(&booking))
}

/// Polling fallback for drivers without an open push channel: pending,
/// unexpired bookings near the driver that it has not rejected.
pub fn pending_bookings_for_driver(
    state: &AppState,
    driver_id: Uuid,
) -> Result<Vec<BookingView>, AppError> {
    let driver = state
        .drivers
        .get(&driver_id)
        .map(|d| d.clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    let now = Utc::now();
    let views = state
        .bookings
        .iter()
        .filter(|entry| {
            let b = entry.value();
            b.status == BookingStatus::Pending
                && !b.rejected_drivers.contains(&driver_id)
                && b.expires_at.map_or(true, |at| at > now)
                && haversine_km(&b.pickup, &driver.location) <= state.config.offer_radius_km
        })
        .map(|entry| BookingView::for_driver(entry.value()))
        .collect();

    Ok(views)
}

/// The driver's active booking, if any.
pub fn current_booking_for_driver(state: &AppState, driver_id: Uuid) -> Option<BookingView> {
    state
        .bookings
        .iter()
        .find(|entry| {
            let b = entry.value();
            b.driver_id == Some(driver_id) && !b.status.is_terminal()
        })
        .map(|entry| BookingView::for_driver(entry.value()))
}

/// The rider's most recent booking that has not reached a terminal state.
pub fn current_booking_for_rider(state: &AppState, rider_id: Uuid) -> Option<BookingView> {
    state
        .bookings
        .iter()
        .filter(|entry| {
            let b = entry.value();
            b.rider_id == rider_id && !b.status.is_terminal()
        })
        .max_by_key(|entry| entry.value().created_at)
        .map(|entry| BookingView::for_rider(entry.value()))
}

/// View of one booking. A `driver_id` viewer gets the progressive-
/// disclosure projection; anyone else gets the rider view.
pub fn booking_view(
    state: &AppState,
    booking_id: Uuid,
    viewer_driver: Option<Uuid>,
) -> Result<BookingView, AppError> {
    let booking = load_booking(state, booking_id)?;

    match viewer_driver {
        Some(_) => Ok(BookingView::for_driver(&booking)),
        None => Ok(BookingView::for_rider(&booking)),
    }
}

fn offer_to_driver(state: &AppState, booking: &Booking, driver_id: Uuid) {
    let Some(driver) = state.drivers.get(&driver_id).map(|d| d.clone()) else {
        return;
    };

    let quoted_fare = calculate_fare(
        booking.distance_m / 1000.0,
        booking.duration_secs,
        &driver.rate_card,
        0.0,
    )
    .unwrap_or(booking.fare);

    let delivered = state.notifier.notify(
        driver_id,
        crate::notify::DriverEvent::RideOffer {
            booking: BookingView::for_driver(booking),
            quoted_fare,
            pickup_distance_km: haversine_km(&booking.pickup, &driver.location),
        },
    );

    if !delivered {
        info!(booking_id = %booking.id, driver_id = %driver_id,
            "pre-selected driver not connected; offer available via polling");
    }
}

/// Sets the driver's busy window to now + the configured exclusion
/// period, keeping it out of matching for every booking in that span.
pub fn mark_driver_busy(state: &AppState, driver_id: Uuid) {
    if let Some(mut driver) = state.drivers.get_mut(&driver_id) {
        driver.busy_until = Some(Utc::now() + Duration::seconds(state.config.driver_busy_secs));
        driver.updated_at = Utc::now();
    }
}

fn load_booking(state: &AppState, booking_id: Uuid) -> Result<Booking, AppError> {
    state
        .bookings
        .get(&booking_id)
        .map(|b| b.clone())
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))
}

fn ensure_assigned(booking: &Booking, driver_id: Uuid) -> Result<(), AppError> {
    if booking.driver_id != Some(driver_id) {
        return Err(AppError::Forbidden(
            "caller is not the driver assigned to this booking".to_string(),
        ));
    }
    Ok(())
}

fn validate_point(point: &GeoPoint, label: &str) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::InvalidArgument(format!(
            "{label} coordinate is out of range"
        )));
    }
    Ok(())
}

fn generate_otp(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}
