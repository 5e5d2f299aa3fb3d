use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::{AssignmentEngine, Dispatcher, Fleet};
use crate::models::order::OrderEvent;
use crate::observability::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::storage::CourierRepository;

pub struct AppState {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub fleet: Arc<dyn Fleet>,
    pub limiter: RateLimiter,
    pub events_tx: mpsc::Sender<OrderEvent>,
    pub metrics: Metrics,
}

impl AppState {
    /// `metrics` should be the same registry the engine records into.
    pub fn new<R: CourierRepository>(
        engine: Arc<AssignmentEngine<R>>,
        limiter: RateLimiter,
        metrics: Metrics,
        event_queue_size: usize,
    ) -> (Self, mpsc::Receiver<OrderEvent>) {
        let (events_tx, events_rx) = mpsc::channel(event_queue_size.max(1));

        (
            Self {
                dispatcher: engine.clone(),
                fleet: engine,
                limiter,
                events_tx,
                metrics,
            },
            events_rx,
        )
    }
}
