use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fare::RateCard;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub online: bool,
    pub location: GeoPoint,
    /// Temporary exclusion window applied after a rejection or a
    /// driver-initiated cancellation. A driver with `busy_until` in the
    /// future is never offered a booking.
    pub busy_until: Option<DateTime<Utc>>,
    pub vehicle_type: String,
    pub plate: Option<String>,
    pub rate_card: RateCard,
    pub rating: f64,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn is_busy(&self, now: DateTime<Utc>) -> bool {
        self.busy_until.is_some_and(|until| until > now)
    }

    pub fn is_matchable(&self, now: DateTime<Utc>) -> bool {
        self.online && !self.is_busy(now)
    }
}
