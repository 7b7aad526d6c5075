use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::fare::calculate_fare;
use crate::matching::match_drivers;
use crate::models::booking::{BookingStatus, BookingView, CancelledBy};
use crate::notify::DriverEvent;
use crate::state::AppState;

/// Side-effect work emitted by the lifecycle manager after a transition
/// has been committed. A failed job never rolls anything back.
#[derive(Debug)]
pub enum DispatchJob {
    /// Fan a pending booking out to matchable drivers near the pickup.
    OfferBooking { booking_id: Uuid },
    /// Tell connected drivers an offer is no longer open (someone
    /// accepted, or the booking went away).
    CloseOffer {
        booking_id: Uuid,
        accepted_driver: Option<Uuid>,
        reason: String,
    },
    /// Tell one driver its active booking was cancelled.
    NotifyCancelled {
        booking_id: Uuid,
        driver_id: Uuid,
        cancelled_by: CancelledBy,
        reason: String,
    },
}

pub async fn enqueue_job(state: &AppState, job: DispatchJob) -> Result<(), AppError> {
    state
        .dispatch_tx
        .send(job)
        .await
        .map_err(|err| AppError::Internal(format!("dispatch queue send failed: {err}")))?;

    state.metrics.dispatch_queue_depth.inc();
    Ok(())
}

pub async fn run_dispatch_engine(state: Arc<AppState>, mut dispatch_rx: mpsc::Receiver<DispatchJob>) {
    info!("dispatch engine started");

    while let Some(job) = dispatch_rx.recv().await {
        state.metrics.dispatch_queue_depth.dec();

        let start = Instant::now();
        match process_job(&state, job).await {
            Ok(()) => {
                state
                    .metrics
                    .dispatch_latency_seconds
                    .with_label_values(&["success"])
                    .observe(start.elapsed().as_secs_f64());
            }
            Err(err) => {
                state
                    .metrics
                    .dispatch_latency_seconds
                    .with_label_values(&["error"])
                    .observe(start.elapsed().as_secs_f64());
                error!(error = %err, "failed to process dispatch job");
            }
        }
    }

    warn!("dispatch engine stopped: queue channel closed");
}

async fn process_job(state: &AppState, job: DispatchJob) -> Result<(), AppError> {
    match job {
        DispatchJob::OfferBooking { booking_id } => offer_booking(state, booking_id),
        DispatchJob::CloseOffer {
            booking_id,
            accepted_driver,
            reason,
        } => {
            close_offer(state, booking_id, accepted_driver, &reason);
            Ok(())
        }
        DispatchJob::NotifyCancelled {
            booking_id,
            driver_id,
            cancelled_by,
            reason,
        } => {
            let delivered = state.notifier.notify(
                driver_id,
                DriverEvent::BookingCancelled {
                    booking_id,
                    cancelled_by,
                    reason,
                },
            );
            if !delivered {
                info!(booking_id = %booking_id, driver_id = %driver_id,
                    "driver not connected for cancellation notice; will surface via polling");
            }
            Ok(())
        }
    }
}

/// Matches a pending booking against the live driver pool and pushes a
/// per-driver offer to each candidate. Quotes use the candidate's own
/// rate card, so two drivers may see different fares for the same trip.
fn offer_booking(state: &AppState, booking_id: Uuid) -> Result<(), AppError> {
    // A stale job (booking gone or already claimed) is a no-op.
    let Some(booking) = state.bookings.get(&booking_id).map(|b| b.clone()) else {
        return Ok(());
    };
    if booking.status != BookingStatus::Pending {
        return Ok(());
    }

    let pool = state.matchable_drivers();
    let candidates = match_drivers(
        &booking.pickup,
        &pool,
        state.config.offer_radius_km,
        &booking.rejected_drivers,
    );

    if candidates.is_empty() {
        info!(booking_id = %booking_id, "no drivers available; booking stays pending");
        return Ok(());
    }

    let trip_km = booking.distance_m / 1000.0;
    let mut sent = 0usize;
    let mut failed = 0usize;

    for candidate in &candidates {
        let quoted_fare = calculate_fare(
            trip_km,
            booking.duration_secs,
            &candidate.driver.rate_card,
            0.0,
        )?;

        let delivered = state.notifier.notify(
            candidate.driver.id,
            DriverEvent::RideOffer {
                booking: BookingView::for_driver(&booking),
                quoted_fare,
                pickup_distance_km: candidate.distance_km,
            },
        );

        if delivered {
            sent += 1;
        } else {
            failed += 1;
        }
    }

    state
        .metrics
        .offers_total
        .with_label_values(&["sent"])
        .inc_by(sent as u64);
    state
        .metrics
        .offers_total
        .with_label_values(&["failed"])
        .inc_by(failed as u64);

    info!(
        booking_id = %booking_id,
        candidates = candidates.len(),
        sent,
        failed,
        "booking offered to nearby drivers"
    );

    Ok(())
}

fn close_offer(state: &AppState, booking_id: Uuid, accepted_driver: Option<Uuid>, reason: &str) {
    let recipients: Vec<Uuid> = state
        .notifier
        .connections()
        .into_iter()
        .map(|c| c.driver_id)
        .filter(|id| Some(*id) != accepted_driver)
        .collect();

    let report = state.notifier.notify_many(
        &recipients,
        &DriverEvent::OfferClosed {
            booking_id,
            reason: reason.to_string(),
        },
    );

    info!(
        booking_id = %booking_id,
        sent = report.sent.len(),
        failed = report.failed.len(),
        "offer closed"
    );
}
