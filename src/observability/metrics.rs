use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub unassignments_total: IntCounterVec,
    pub couriers_released_total: IntCounter,
    pub upstream_retries_total: IntCounterVec,
    pub rate_limited_total: IntCounter,
    pub order_events_total: IntCounterVec,
    pub order_events_in_queue: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of the assignment transaction in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let unassignments_total = IntCounterVec::new(
            Opts::new("unassignments_total", "Total unassignments by outcome"),
            &["outcome"],
        )
        .expect("valid unassignments_total metric");

        let couriers_released_total = IntCounter::new(
            "couriers_released_total",
            "Couriers released by the expiry sweep",
        )
        .expect("valid couriers_released_total metric");

        let upstream_retries_total = IntCounterVec::new(
            Opts::new(
                "upstream_retries_total",
                "Retried calls to the upstream order service by method",
            ),
            &["method"],
        )
        .expect("valid upstream_retries_total metric");

        let rate_limited_total =
            IntCounter::new("rate_limited_total", "Requests rejected by the rate limiter")
                .expect("valid rate_limited_total metric");

        let order_events_total = IntCounterVec::new(
            Opts::new("order_events_total", "Processed order events by kind and outcome"),
            &["kind", "outcome"],
        )
        .expect("valid order_events_total metric");

        let order_events_in_queue = IntGauge::new(
            "order_events_in_queue",
            "Order events waiting to be processed",
        )
        .expect("valid order_events_in_queue metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(unassignments_total.clone()))
            .expect("register unassignments_total");
        registry
            .register(Box::new(couriers_released_total.clone()))
            .expect("register couriers_released_total");
        registry
            .register(Box::new(upstream_retries_total.clone()))
            .expect("register upstream_retries_total");
        registry
            .register(Box::new(rate_limited_total.clone()))
            .expect("register rate_limited_total");
        registry
            .register(Box::new(order_events_total.clone()))
            .expect("register order_events_total");
        registry
            .register(Box::new(order_events_in_queue.clone()))
            .expect("register order_events_in_queue");

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            unassignments_total,
            couriers_released_total,
            upstream_retries_total,
            rate_limited_total,
            order_events_total,
            order_events_in_queue,
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
