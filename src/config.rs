use std::env;

use crate::error::AppError;
use crate::fare::RateCard;

/// Process configuration, built once at startup and injected everywhere a
/// tunable is needed. No ambient globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub dispatch_queue_size: usize,
    pub driver_channel_size: usize,
    /// Radius for the ambient offer fanout when a booking is created
    /// without a pre-selected driver.
    pub offer_radius_km: f64,
    /// Radius for the explicit nearest-drivers ride-request query.
    pub request_radius_km: f64,
    pub nearest_drivers_limit: usize,
    /// Unclaimed bookings auto-cancel after this window.
    pub booking_expiry_secs: i64,
    /// Exclusion window applied to a driver after a rejection.
    pub driver_busy_secs: i64,
    /// How often the sweeper re-checks pending bookings for expiry.
    pub expiry_sweep_interval_secs: u64,
    pub otp_length: usize,
    pub default_rate: RateCard,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            dispatch_queue_size: parse_or_default("DISPATCH_QUEUE_SIZE", 1024)?,
            driver_channel_size: parse_or_default("DRIVER_CHANNEL_SIZE", 64)?,
            offer_radius_km: parse_or_default("OFFER_RADIUS_KM", 5.0)?,
            request_radius_km: parse_or_default("REQUEST_RADIUS_KM", 2.0)?,
            nearest_drivers_limit: parse_or_default("NEAREST_DRIVERS_LIMIT", 5)?,
            booking_expiry_secs: parse_or_default("BOOKING_EXPIRY_SECS", 180)?,
            driver_busy_secs: parse_or_default("DRIVER_BUSY_SECS", 180)?,
            expiry_sweep_interval_secs: parse_or_default("EXPIRY_SWEEP_INTERVAL_SECS", 15)?,
            otp_length: parse_or_default("OTP_LENGTH", 4)?,
            default_rate: RateCard {
                minimum_fare: parse_or_default("MINIMUM_FARE", 50.0)?,
                per_km_rate: parse_or_default("PER_KM_RATE", 15.0)?,
                waiting_charge_per_minute: parse_or_default("WAITING_CHARGE_PER_MINUTE", 0.0)?,
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
