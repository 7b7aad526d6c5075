use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub bookings_total: IntCounterVec,
    pub offers_total: IntCounterVec,
    pub dispatch_queue_depth: IntGauge,
    pub dispatch_latency_seconds: HistogramVec,
    pub connected_drivers: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bookings_total = IntCounterVec::new(
            Opts::new("bookings_total", "Booking lifecycle events by outcome"),
            &["outcome"],
        )
        .expect("valid bookings_total metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Ride offers pushed to drivers by result"),
            &["result"],
        )
        .expect("valid offers_total metric");

        let dispatch_queue_depth =
            IntGauge::new("dispatch_queue_depth", "Jobs waiting in the dispatch queue")
                .expect("valid dispatch_queue_depth metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of dispatch job processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let connected_drivers =
            IntGauge::new("connected_drivers", "Drivers with an open delivery channel")
                .expect("valid connected_drivers metric");

        registry
            .register(Box::new(bookings_total.clone()))
            .expect("register bookings_total");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(dispatch_queue_depth.clone()))
            .expect("register dispatch_queue_depth");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(connected_drivers.clone()))
            .expect("register connected_drivers");

        Self {
            registry,
            bookings_total,
            offers_total,
            dispatch_queue_depth,
            dispatch_latency_seconds,
            connected_drivers,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
