use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::dispatch::DispatchJob;
use crate::models::booking::Booking;
use crate::models::driver::Driver;
use crate::notify::Notifier;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub config: Config,
    pub bookings: DashMap<Uuid, Booking>,
    pub drivers: DashMap<Uuid, Driver>,
    pub dispatch_tx: mpsc::Sender<DispatchJob>,
    pub notifier: Notifier,
    pub metrics: Metrics,
    // Lifecycle mutations serialize per booking id; the store itself has
    // no conditional-update primitive to lean on.
    booking_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(config: Config) -> (Self, mpsc::Receiver<DispatchJob>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);
        let notifier = Notifier::new(config.driver_channel_size);

        (
            Self {
                config,
                bookings: DashMap::new(),
                drivers: DashMap::new(),
                dispatch_tx,
                notifier,
                metrics: Metrics::new(),
                booking_locks: DashMap::new(),
            },
            dispatch_rx,
        )
    }

    /// The async mutex guarding lifecycle transitions for one booking.
    pub fn booking_lock(&self, booking_id: Uuid) -> Arc<Mutex<()>> {
        self.booking_locks
            .entry(booking_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Snapshot of the drivers currently eligible to receive offers.
    pub fn matchable_drivers(&self) -> Vec<Driver> {
        let now = Utc::now();
        self.drivers
            .iter()
            .filter(|entry| entry.value().is_matchable(now))
            .map(|entry| entry.value().clone())
            .collect()
    }
}
