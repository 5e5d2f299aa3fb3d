//! Order lifecycle events to reservation calls.
//!
//! `created` reserves a courier, `canceled`/`deleted` and `completed` release
//! it. Outcomes that are expected under at-least-once delivery (no courier
//! free, order already assigned, nothing to release) are skipped rather than
//! reported as failures.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};
use tracing::{debug, error, info, warn};

use crate::engine::{Dispatcher, EngineError};
use crate::models::delivery::{AssignResult, UnassignResult};
use crate::models::order::{OrderEvent, OrderEventKind};
use crate::observability::metrics::Metrics;
use crate::upstream::OrderLookup;

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Assigned(AssignResult),
    Unassigned(UnassignResult),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoAvailableCourier,
    AlreadyAssigned,
    NoDelivery,
    UnknownStatus,
    UnknownUpstreamOrder,
}

impl EventOutcome {
    fn label(&self) -> &'static str {
        match self {
            EventOutcome::Assigned(_) => "assigned",
            EventOutcome::Unassigned(_) => "unassigned",
            EventOutcome::Skipped(_) => "skipped",
        }
    }
}

pub struct OrderEventProcessor {
    dispatcher: Arc<dyn Dispatcher>,
    orders: Option<Arc<dyn OrderLookup>>,
    metrics: Metrics,
}

impl OrderEventProcessor {
    /// `orders` is the (retrying) upstream lookup; `None` disables enrichment.
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        orders: Option<Arc<dyn OrderLookup>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            dispatcher,
            orders,
            metrics,
        }
    }

    pub async fn handle(
        &self,
        ctx: &CancellationToken,
        event: &OrderEvent,
    ) -> Result<EventOutcome, EngineError> {
        let (kind, result) = match self.canonical_status(ctx, event).await {
            Some(status) => {
                let kind = OrderEventKind::parse(&status);
                (kind, self.dispatch(kind, &event.order_id).await)
            }
            None => (
                OrderEventKind::Unknown,
                Ok(EventOutcome::Skipped(SkipReason::UnknownUpstreamOrder)),
            ),
        };

        self.record(kind, &result);
        result
    }

    /// Replays upstream orders created since `from` through the same dispatch
    /// and metrics as [`Self::handle`]. The listed status is already
    /// canonical, so no per-order lookup is made. Returns how many events
    /// were handled without error.
    pub async fn backfill(
        &self,
        ctx: &CancellationToken,
        from: DateTime<Utc>,
    ) -> Result<usize, Status> {
        let Some(orders) = &self.orders else {
            return Ok(0);
        };

        let listed = orders.list_from(ctx, from).await?;
        let total = listed.len();
        let mut handled = 0;
        for order in listed {
            if ctx.is_cancelled() {
                break;
            }
            let event = OrderEvent::from(order);
            let kind = OrderEventKind::parse(&event.status);
            let result = self.dispatch(kind, &event.order_id).await;
            self.record(kind, &result);
            match result {
                Ok(_) => handled += 1,
                Err(err) => warn!(order_id = %event.order_id, error = %err, "backfill event failed"),
            }
        }

        info!(total, handled, from = %from, "order backfill finished");
        Ok(handled)
    }

    fn record(&self, kind: OrderEventKind, result: &Result<EventOutcome, EngineError>) {
        let outcome = result.as_ref().map(EventOutcome::label).unwrap_or("error");
        self.metrics
            .order_events_total
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
    }

    async fn canonical_status(&self, ctx: &CancellationToken, event: &OrderEvent) -> Option<String> {
        let Some(orders) = &self.orders else {
            return Some(event.status.clone());
        };

        match orders.get_by_id(ctx, &event.order_id).await {
            Ok(order) => Some(order.status),
            Err(status) if status.code() == Code::NotFound => {
                warn!(order_id = %event.order_id, "order unknown upstream; dropping event");
                None
            }
            Err(status) => {
                warn!(
                    order_id = %event.order_id,
                    code = ?status.code(),
                    error = %status.message(),
                    "order enrichment failed; using event status"
                );
                Some(event.status.clone())
            }
        }
    }

    async fn dispatch(&self, kind: OrderEventKind, order_id: &str) -> Result<EventOutcome, EngineError> {
        match kind {
            OrderEventKind::Created => match self.dispatcher.assign(order_id).await {
                Ok(assigned) => Ok(EventOutcome::Assigned(assigned)),
                Err(EngineError::NoAvailableCourier) => {
                    Ok(EventOutcome::Skipped(SkipReason::NoAvailableCourier))
                }
                Err(EngineError::AlreadyAssigned(_)) => {
                    Ok(EventOutcome::Skipped(SkipReason::AlreadyAssigned))
                }
                Err(err) => Err(err),
            },
            OrderEventKind::Canceled | OrderEventKind::Completed => {
                match self.dispatcher.unassign(order_id).await {
                    Ok(released) => Ok(EventOutcome::Unassigned(released)),
                    Err(EngineError::DeliveryNotFound(_)) => {
                        Ok(EventOutcome::Skipped(SkipReason::NoDelivery))
                    }
                    Err(err) => Err(err),
                }
            }
            OrderEventKind::Unknown => Ok(EventOutcome::Skipped(SkipReason::UnknownStatus)),
        }
    }
}

/// Drains the event queue until it closes or `shutdown` fires.
///
/// Cancellation drops the in-flight call, which rolls back any open
/// transaction.
pub async fn run_event_processor(
    processor: Arc<OrderEventProcessor>,
    mut events_rx: mpsc::Receiver<OrderEvent>,
    shutdown: CancellationToken,
) {
    info!("order event processor started");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        processor.metrics.order_events_in_queue.dec();

        tokio::select! {
            _ = shutdown.cancelled() => {
                warn!(order_id = %event.order_id, "shutdown interrupted order event");
                break;
            }
            result = processor.handle(&shutdown, &event) => match result {
                Ok(EventOutcome::Skipped(reason)) => {
                    debug!(order_id = %event.order_id, ?reason, "order event skipped");
                }
                Ok(_) => {}
                Err(err) => {
                    error!(order_id = %event.order_id, status = %event.status, error = %err, "failed to process order event");
                }
            },
        }
    }

    info!("order event processor stopped");
}
