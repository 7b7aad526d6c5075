use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::models::booking::{BookingView, CancelledBy};

/// Events pushed to a connected driver over its delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    Connected {
        driver_id: Uuid,
    },
    RideOffer {
        booking: BookingView,
        quoted_fare: f64,
        pickup_distance_km: f64,
    },
    OfferClosed {
        booking_id: Uuid,
        reason: String,
    },
    BookingCancelled {
        booking_id: Uuid,
        cancelled_by: CancelledBy,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub driver_id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub age_secs: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct DeliveryReport {
    pub sent: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

struct DriverChannel {
    tx: mpsc::Sender<DriverEvent>,
    connected_at: DateTime<Utc>,
}

/// Registry of at most one open delivery channel per driver. Push is a
/// latency optimization only: there is no queueing, retry, or delivery
/// acknowledgement, and disconnected drivers fall back to polling the
/// pending-bookings query.
pub struct Notifier {
    channels: DashMap<Uuid, DriverChannel>,
    channel_size: usize,
}

impl Notifier {
    pub fn new(channel_size: usize) -> Self {
        Self {
            channels: DashMap::new(),
            channel_size,
        }
    }

    /// Registers a fresh channel for `driver_id`, replacing any prior one
    /// by key (last subscribe wins), and queues the initial `Connected`
    /// acknowledgement.
    pub fn subscribe(&self, driver_id: Uuid) -> mpsc::Receiver<DriverEvent> {
        let (tx, rx) = mpsc::channel(self.channel_size);

        let _ = tx.try_send(DriverEvent::Connected { driver_id });
        self.channels.insert(
            driver_id,
            DriverChannel {
                tx,
                connected_at: Utc::now(),
            },
        );

        debug!(driver_id = %driver_id, "driver channel registered");
        rx
    }

    pub fn unsubscribe(&self, driver_id: Uuid) {
        self.channels.remove(&driver_id);
        debug!(driver_id = %driver_id, "driver channel deregistered");
    }

    /// Pushes `event` to `driver_id` if connected. Returns whether the
    /// push was handed to the channel; a closed channel is deregistered
    /// on the spot.
    pub fn notify(&self, driver_id: Uuid, event: DriverEvent) -> bool {
        let Some(channel) = self.channels.get(&driver_id) else {
            return false;
        };

        match channel.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                drop(channel);
                self.channels.remove(&driver_id);
                false
            }
        }
    }

    pub fn notify_many(&self, driver_ids: &[Uuid], event: &DriverEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for &driver_id in driver_ids {
            if self.notify(driver_id, event.clone()) {
                report.sent.push(driver_id);
            } else {
                report.failed.push(driver_id);
            }
        }

        report
    }

    pub fn is_connected(&self, driver_id: Uuid) -> bool {
        self.channels.contains_key(&driver_id)
    }

    pub fn connected_count(&self) -> usize {
        self.channels.len()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let now = Utc::now();
        self.channels
            .iter()
            .map(|entry| ConnectionInfo {
                driver_id: *entry.key(),
                connected_at: entry.value().connected_at,
                age_secs: (now - entry.value().connected_at).num_seconds(),
            })
            .collect()
    }
}
