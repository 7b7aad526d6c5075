use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;
use uuid::Uuid;

use crate::engine::dispatch::{enqueue_job, DispatchJob};
use crate::engine::lifecycle::mark_driver_busy;
use crate::models::booking::{BookingStatus, CancellationInfo, CancelledBy};
use crate::state::AppState;

const EXPIRY_REASON: &str = "no driver accepted within the expiry window";

/// Periodic sweep over the booking store cancelling pending bookings past
/// their `expires_at`. `expires_at` lives on the document itself, so a
/// restart only delays an expiry until the next sweep, never loses it.
pub async fn run_expiry_sweeper(state: Arc<AppState>) {
    let mut ticker = interval(Duration::from_secs(state.config.expiry_sweep_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("expiry sweeper started");

    loop {
        ticker.tick().await;
        sweep_expired(&state).await;
    }
}

/// One sweep pass. Returns how many bookings were expired.
pub async fn sweep_expired(state: &AppState) -> usize {
    let now = Utc::now();

    let due: Vec<Uuid> = state
        .bookings
        .iter()
        .filter(|entry| {
            let b = entry.value();
            b.status == BookingStatus::Pending && b.expires_at.is_some_and(|at| at <= now)
        })
        .map(|entry| *entry.key())
        .collect();

    let mut expired = 0;
    for booking_id in due {
        if expire_booking(state, booking_id).await {
            expired += 1;
        }
    }

    expired
}

/// Cancels one overdue booking if it is still pending. Firing on a
/// booking that left `Pending` since the scan is a no-op. Drivers who
/// rejected the booking pick up a fresh busy window so they do not
/// immediately re-enter the pool for another request.
async fn expire_booking(state: &AppState, booking_id: Uuid) -> bool {
    let lock = state.booking_lock(booking_id);
    let _guard = lock.lock().await;

    let Some(mut booking) = state.bookings.get(&booking_id).map(|b| b.clone()) else {
        return false;
    };

    let now = Utc::now();
    if booking.status != BookingStatus::Pending || booking.expires_at.map_or(true, |at| at > now) {
        return false;
    }

    booking.cancellation = Some(CancellationInfo {
        cancelled_by: CancelledBy::System,
        driver_id: None,
        reason: EXPIRY_REASON.to_string(),
        at: now,
    });
    booking.record_transition(
        BookingStatus::Cancelled,
        "system",
        Some(EXPIRY_REASON.to_string()),
    );

    let rejecting_drivers: Vec<Uuid> = booking.rejected_drivers.iter().copied().collect();
    state.bookings.insert(booking_id, booking);

    for driver_id in rejecting_drivers {
        mark_driver_busy(state, driver_id);
    }

    state
        .metrics
        .bookings_total
        .with_label_values(&["expired"])
        .inc();
    info!(booking_id = %booking_id, "unclaimed booking expired");

    let _ = enqueue_job(
        state,
        DispatchJob::CloseOffer {
            booking_id,
            accepted_driver: None,
            reason: "booking expired".to_string(),
        },
    )
    .await;

    true
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::sweep_expired;
    use crate::config::Config;
    use crate::engine::lifecycle::{accept_booking, create_booking, CreateBooking};
    use crate::fare::RateCard;
    use crate::geo::GeoPoint;
    use crate::models::booking::{BookingStatus, CancelledBy};
    use crate::models::driver::Driver;
    use crate::state::AppState;

    fn test_state() -> AppState {
        let config = Config {
            http_port: 0,
            log_level: "info".to_string(),
            dispatch_queue_size: 64,
            driver_channel_size: 8,
            offer_radius_km: 5.0,
            request_radius_km: 2.0,
            nearest_drivers_limit: 5,
            booking_expiry_secs: 180,
            driver_busy_secs: 180,
            expiry_sweep_interval_secs: 15,
            otp_length: 4,
            default_rate: RateCard {
                minimum_fare: 50.0,
                per_km_rate: 15.0,
                waiting_charge_per_minute: 0.0,
            },
        };
        let (state, _rx) = AppState::new(config);
        state
    }

    fn add_driver(state: &AppState) -> Uuid {
        let id = Uuid::new_v4();
        state.drivers.insert(
            id,
            Driver {
                id,
                name: "sweeper test driver".to_string(),
                online: true,
                location: GeoPoint {
                    lat: 10.0,
                    lng: 76.0,
                },
                busy_until: None,
                vehicle_type: "sedan".to_string(),
                plate: None,
                rate_card: RateCard {
                    minimum_fare: 50.0,
                    per_km_rate: 15.0,
                    waiting_charge_per_minute: 0.0,
                },
                rating: 4.5,
                updated_at: Utc::now(),
            },
        );
        id
    }

    async fn pending_booking(state: &AppState) -> Uuid {
        let booking = create_booking(
            state,
            CreateBooking {
                rider_id: Uuid::new_v4(),
                pickup: GeoPoint {
                    lat: 10.0,
                    lng: 76.0,
                },
                dropoff: GeoPoint {
                    lat: 10.1,
                    lng: 76.1,
                },
                pickup_location: "MG Road".to_string(),
                dropoff_location: "Airport".to_string(),
                distance_m: 5000.0,
                duration_secs: 600,
                offered_price: None,
                payment_method: "cash".to_string(),
                vehicle_type: None,
                driver_id: None,
            },
        )
        .await
        .unwrap();
        booking.id
    }

    fn force_overdue(state: &AppState, booking_id: Uuid) {
        let mut booking = state.bookings.get(&booking_id).unwrap().clone();
        booking.expires_at = Some(Utc::now() - Duration::seconds(1));
        state.bookings.insert(booking_id, booking);
    }

    #[tokio::test]
    async fn overdue_pending_booking_is_cancelled() {
        let state = test_state();
        let booking_id = pending_booking(&state).await;
        force_overdue(&state, booking_id);

        assert_eq!(sweep_expired(&state).await, 1);

        let booking = state.bookings.get(&booking_id).unwrap().clone();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(
            booking.cancellation.as_ref().unwrap().cancelled_by,
            CancelledBy::System
        );
    }

    #[tokio::test]
    async fn unexpired_booking_is_untouched() {
        let state = test_state();
        let booking_id = pending_booking(&state).await;

        assert_eq!(sweep_expired(&state).await, 0);
        assert_eq!(
            state.bookings.get(&booking_id).unwrap().status,
            BookingStatus::Pending
        );
    }

    #[tokio::test]
    async fn accepted_booking_never_expires() {
        let state = test_state();
        let driver_id = add_driver(&state);
        let booking_id = pending_booking(&state).await;
        force_overdue(&state, booking_id);
        accept_booking(&state, booking_id, driver_id).await.unwrap();

        assert_eq!(sweep_expired(&state).await, 0);
        assert_eq!(
            state.bookings.get(&booking_id).unwrap().status,
            BookingStatus::Accepted
        );
    }

    #[tokio::test]
    async fn rejecting_drivers_are_penalized_on_expiry() {
        let state = test_state();
        let driver_id = add_driver(&state);
        let booking_id = pending_booking(&state).await;

        crate::engine::lifecycle::reject_booking(&state, booking_id, driver_id)
            .await
            .unwrap();
        // Let the rejection's own busy window lapse before the sweep.
        if let Some(mut driver) = state.drivers.get_mut(&driver_id) {
            driver.busy_until = None;
        }

        force_overdue(&state, booking_id);
        assert_eq!(sweep_expired(&state).await, 1);

        let busy_until = state.drivers.get(&driver_id).unwrap().busy_until;
        assert!(busy_until.is_some_and(|at| at > Utc::now()));
    }
}
