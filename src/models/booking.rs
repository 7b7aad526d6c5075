use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CancelledBy {
    User,
    Driver,
    System,
}

/// One append-only entry in a booking's transition history. Entries are
/// written once and never mutated or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: BookingStatus,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub cancelled_by: CancelledBy,
    pub driver_id: Option<Uuid>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the driver and vehicle embedded in a booking at acceptance.
/// Absence (before any driver accepts) is a first-class state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSnapshot {
    pub driver_id: Uuid,
    pub name: String,
    pub vehicle_type: String,
    pub plate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub score: u8,
    pub feedback: Option<String>,
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub driver: Option<DriverSnapshot>,

    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_location: String,
    pub dropoff_location: String,

    pub distance_m: f64,
    pub duration_secs: u32,
    pub fare: f64,
    pub final_price: f64,
    pub payment_method: String,
    pub payment_completed: bool,

    pub ride_otp: String,
    pub otp_verified: bool,

    pub status: BookingStatus,
    pub history: Vec<StatusChange>,
    pub rejected_drivers: HashSet<Uuid>,
    pub cancellation: Option<CancellationInfo>,
    pub rating: Option<Rating>,

    pub vehicle_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn record_transition(&mut self, status: BookingStatus, actor: &str, note: Option<String>) {
        self.status = status;
        self.history.push(StatusChange {
            status,
            at: Utc::now(),
            actor: actor.to_string(),
            note,
        });
    }
}

/// Projection of a booking returned to callers. The drop-off fields are
/// `None` for the assigned driver until the rider's OTP has been verified;
/// rider views always carry them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingView {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub driver: Option<DriverSnapshot>,
    pub status: BookingStatus,
    pub pickup: GeoPoint,
    pub pickup_location: String,
    pub dropoff: Option<GeoPoint>,
    pub dropoff_location: Option<String>,
    pub distance_m: f64,
    pub duration_secs: u32,
    pub fare: f64,
    pub final_price: f64,
    pub payment_method: String,
    pub payment_completed: bool,
    /// Present only in rider views; the driver learns the code from the
    /// rider at pickup.
    pub ride_otp: Option<String>,
    pub otp_verified: bool,
    pub rating: Option<Rating>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BookingView {
    /// Full projection, as seen by the rider who owns the booking.
    pub fn for_rider(booking: &Booking) -> Self {
        let mut view = Self::project(booking, true);
        view.ride_otp = Some(booking.ride_otp.clone());
        view
    }

    /// Driver-facing projection: drop-off detail is withheld until the
    /// pickup OTP has been verified, and the OTP itself is never sent.
    pub fn for_driver(booking: &Booking) -> Self {
        Self::project(booking, booking.otp_verified)
    }

    fn project(booking: &Booking, reveal_dropoff: bool) -> Self {
        Self {
            id: booking.id,
            rider_id: booking.rider_id,
            driver_id: booking.driver_id,
            driver: booking.driver.clone(),
            status: booking.status,
            pickup: booking.pickup,
            pickup_location: booking.pickup_location.clone(),
            dropoff: reveal_dropoff.then_some(booking.dropoff),
            dropoff_location: reveal_dropoff.then(|| booking.dropoff_location.clone()),
            distance_m: booking.distance_m,
            duration_secs: booking.duration_secs,
            fare: booking.fare,
            final_price: booking.final_price,
            payment_method: booking.payment_method.clone(),
            payment_completed: booking.payment_completed,
            ride_otp: None,
            otp_verified: booking.otp_verified,
            rating: booking.rating.clone(),
            expires_at: booking.expires_at,
            created_at: booking.created_at,
            started_at: booking.started_at,
            ended_at: booking.ended_at,
        }
    }
}
