//! Transactional courier reservation.
//!
//! `assign` and `unassign` each run inside one repository transaction. Any
//! early return drops the transaction handle, which rolls it back, so a
//! half-made reservation is never visible. The same holds when the calling
//! future is dropped mid-flight.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::{Dispatcher, EngineError, Fleet};
use crate::models::courier::{Courier, CourierStatus, NewCourier};
use crate::models::delivery::{AssignResult, Delivery, UnassignResult};
use crate::observability::metrics::Metrics;
use crate::storage::{CourierRepository, RepositoryError};

pub struct AssignmentEngine<R: CourierRepository> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    assignments_tx: broadcast::Sender<AssignResult>,
}

impl<R: CourierRepository> AssignmentEngine<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, metrics: Metrics, event_buffer_size: usize) -> Self {
        let (assignments_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));
        Self {
            repo,
            clock,
            metrics,
            assignments_tx,
        }
    }

    pub async fn assign(&self, order_id: &str) -> Result<AssignResult, EngineError> {
        let order_id = validate_order_id(order_id)?;
        let start = Instant::now();

        let result = self.reserve(order_id).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(EngineError::NoAvailableCourier) => "no_courier",
            Err(EngineError::AlreadyAssigned(_)) => "already_assigned",
            Err(_) => "error",
        };
        self.metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        match &result {
            Ok(assigned) => {
                info!(
                    order_id = %assigned.order_id,
                    courier_id = %assigned.courier_id,
                    transport = %assigned.transport_type,
                    deadline = %assigned.deadline,
                    "order assigned"
                );
                let _ = self.assignments_tx.send(assigned.clone());
            }
            Err(EngineError::NoAvailableCourier) => {
                debug!(order_id, "no available courier for order");
            }
            Err(err) => {
                warn!(order_id, error = %err, "assignment failed");
            }
        }

        result
    }

    pub async fn unassign(&self, order_id: &str) -> Result<UnassignResult, EngineError> {
        let order_id = validate_order_id(order_id)?;

        let result = self.release(order_id).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(EngineError::DeliveryNotFound(_)) => "not_found",
            Err(_) => "error",
        };
        self.metrics
            .unassignments_total
            .with_label_values(&[outcome])
            .inc();

        if let Ok(released) = &result {
            info!(
                order_id = %released.order_id,
                courier_id = %released.courier_id,
                courier_status = %released.status,
                "order unassigned"
            );
        }

        result
    }

    pub async fn release_expired(&self) -> Result<u64, EngineError> {
        let now = self.clock.now_utc();
        let released = self.repo.release_expired_couriers(now).await?;
        self.metrics.couriers_released_total.inc_by(released);
        Ok(released)
    }

    async fn reserve(&self, order_id: &str) -> Result<AssignResult, EngineError> {
        let mut tx = self.repo.begin().await?;

        let Some(courier) = self.repo.find_available_courier_for_update(&mut tx).await? else {
            self.repo.rollback(tx).await?;
            return Err(EngineError::NoAvailableCourier);
        };

        let now = self.clock.now_utc();
        let delivery = Delivery {
            id: Uuid::new_v4(),
            courier_id: courier.id,
            order_id: order_id.to_string(),
            assigned_at: now,
            deadline: now + courier.transport_type.delivery_window(),
        };

        self.repo
            .insert_delivery(&mut tx, &delivery)
            .await
            .map_err(|err| match err {
                RepositoryError::DuplicateOrder => EngineError::AlreadyAssigned(order_id.to_string()),
                other => other.into(),
            })?;
        self.repo
            .update_courier_status(&mut tx, courier.id, CourierStatus::Busy, now)
            .await?;
        self.repo.commit(tx).await?;

        Ok(AssignResult {
            courier_id: courier.id,
            order_id: delivery.order_id,
            transport_type: courier.transport_type,
            deadline: delivery.deadline,
        })
    }

    async fn release(&self, order_id: &str) -> Result<UnassignResult, EngineError> {
        let mut tx = self.repo.begin().await?;

        let Some(delivery) = self.repo.get_delivery_by_order_id(&mut tx, order_id).await? else {
            self.repo.rollback(tx).await?;
            return Err(EngineError::DeliveryNotFound(order_id.to_string()));
        };

        self.repo.delete_delivery_by_order_id(&mut tx, order_id).await?;

        let courier = self
            .repo
            .get_courier_for_update(&mut tx, delivery.courier_id)
            .await?
            .ok_or(RepositoryError::CourierNotFound)?;

        // Only a busy courier is handed back. After the expiry sweep it may be
        // paused by an admin, or busy again with a newer reservation.
        let now = self.clock.now_utc();
        let still_reserved = courier.status != CourierStatus::Busy
            || self
                .repo
                .has_unexpired_delivery(&mut tx, courier.id, now)
                .await?;
        let status = if still_reserved {
            courier.status
        } else {
            self.repo
                .update_courier_status(&mut tx, courier.id, CourierStatus::Available, now)
                .await?;
            CourierStatus::Available
        };
        self.repo.commit(tx).await?;

        Ok(UnassignResult {
            courier_id: delivery.courier_id,
            order_id: delivery.order_id,
            status,
        })
    }
}

#[async_trait]
impl<R: CourierRepository> Dispatcher for AssignmentEngine<R> {
    async fn assign(&self, order_id: &str) -> Result<AssignResult, EngineError> {
        AssignmentEngine::assign(self, order_id).await
    }

    async fn unassign(&self, order_id: &str) -> Result<UnassignResult, EngineError> {
        AssignmentEngine::unassign(self, order_id).await
    }

    async fn release_expired(&self) -> Result<u64, EngineError> {
        AssignmentEngine::release_expired(self).await
    }
}

#[async_trait]
impl<R: CourierRepository> Fleet for AssignmentEngine<R> {
    async fn register_courier(&self, courier: NewCourier) -> Result<Courier, RepositoryError> {
        let courier = self.repo.create_courier(courier, self.clock.now_utc()).await?;
        info!(
            courier_id = %courier.id,
            transport_type = %courier.transport_type,
            "courier registered"
        );
        Ok(courier)
    }

    async fn couriers(&self) -> Result<Vec<Courier>, RepositoryError> {
        self.repo.list_couriers().await
    }

    async fn set_courier_status(
        &self,
        courier_id: Uuid,
        status: CourierStatus,
    ) -> Result<Courier, RepositoryError> {
        let courier = self
            .repo
            .set_courier_status(courier_id, status, self.clock.now_utc())
            .await?;
        debug!(courier_id = %courier.id, status = %courier.status, "courier status changed");
        Ok(courier)
    }

    async fn deliveries(&self) -> Result<Vec<Delivery>, RepositoryError> {
        self.repo.list_deliveries().await
    }

    /// Live feed of committed assignments.
    fn subscribe(&self) -> broadcast::Receiver<AssignResult> {
        self.assignments_tx.subscribe()
    }
}

fn validate_order_id(order_id: &str) -> Result<&str, EngineError> {
    let trimmed = order_id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidOrderId);
    }
    Ok(trimmed)
}
