//! In-process transactional store.
//!
//! A transaction holds the table mutex for its whole lifetime and works on a
//! staged copy of the tables, which replaces the shared copy only on commit.
//! That serializes writers the same way row locks serialize competing
//! `Assign` calls in Postgres, and makes rollback a plain drop.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::courier::{Courier, CourierStatus, NewCourier};
use crate::models::delivery::Delivery;
use crate::storage::{CourierRepository, RepositoryError};

#[derive(Debug, Clone, Default)]
struct Tables {
    couriers: BTreeMap<Uuid, Courier>,
    // keyed by order id, which is unique per delivery
    deliveries: BTreeMap<String, Delivery>,
}

impl Tables {
    fn delivery_count(&self, courier_id: Uuid) -> usize {
        self.deliveries
            .values()
            .filter(|delivery| delivery.courier_id == courier_id)
            .count()
    }
}

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    FindAvailableCourier,
    UpdateCourierStatus,
    InsertDelivery,
    DeleteDelivery,
    ReleaseExpired,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    tables: Arc<Mutex<Tables>>,
    fail_points: Arc<parking_lot::Mutex<HashSet<FailPoint>>>,
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `point` fail with
    /// [`RepositoryError::Unavailable`] until [`Self::clear_failures`].
    pub fn inject_failure(&self, point: FailPoint) {
        self.fail_points.lock().insert(point);
    }

    pub fn clear_failures(&self) {
        self.fail_points.lock().clear();
    }

    /// Seeds a delivery row directly, bypassing the engine.
    pub async fn insert_delivery_unchecked(&self, delivery: Delivery) {
        self.tables
            .lock()
            .await
            .deliveries
            .insert(delivery.order_id.clone(), delivery);
    }

    fn check(&self, point: FailPoint) -> Result<(), RepositoryError> {
        if self.fail_points.lock().contains(&point) {
            return Err(RepositoryError::Unavailable(format!(
                "injected failure at {point:?}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CourierRepository for MemoryRepository {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, RepositoryError> {
        self.check(FailPoint::Begin)?;
        let guard = self.tables.clone().lock_owned().await;
        let staged = (*guard).clone();
        Ok(MemoryTx { guard, staged })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), RepositoryError> {
        let MemoryTx { mut guard, staged } = tx;
        *guard = staged;
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), RepositoryError> {
        drop(tx);
        Ok(())
    }

    async fn find_available_courier_for_update(
        &self,
        tx: &mut MemoryTx,
    ) -> Result<Option<Courier>, RepositoryError> {
        self.check(FailPoint::FindAvailableCourier)?;
        let tables = &tx.staged;
        let courier = tables
            .couriers
            .values()
            .filter(|courier| courier.status == CourierStatus::Available)
            .min_by_key(|courier| (tables.delivery_count(courier.id), courier.id))
            .cloned();
        Ok(courier)
    }

    async fn get_courier_for_update(
        &self,
        tx: &mut MemoryTx,
        courier_id: Uuid,
    ) -> Result<Option<Courier>, RepositoryError> {
        Ok(tx.staged.couriers.get(&courier_id).cloned())
    }

    async fn update_courier_status(
        &self,
        tx: &mut MemoryTx,
        courier_id: Uuid,
        status: CourierStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check(FailPoint::UpdateCourierStatus)?;
        let courier = tx
            .staged
            .couriers
            .get_mut(&courier_id)
            .ok_or(RepositoryError::CourierNotFound)?;
        courier.status = status;
        courier.updated_at = now;
        Ok(())
    }

    async fn insert_delivery(
        &self,
        tx: &mut MemoryTx,
        delivery: &Delivery,
    ) -> Result<(), RepositoryError> {
        self.check(FailPoint::InsertDelivery)?;
        if tx.staged.deliveries.contains_key(&delivery.order_id) {
            return Err(RepositoryError::DuplicateOrder);
        }
        if !tx.staged.couriers.contains_key(&delivery.courier_id) {
            return Err(RepositoryError::CourierNotFound);
        }
        tx.staged
            .deliveries
            .insert(delivery.order_id.clone(), delivery.clone());
        Ok(())
    }

    async fn get_delivery_by_order_id(
        &self,
        tx: &mut MemoryTx,
        order_id: &str,
    ) -> Result<Option<Delivery>, RepositoryError> {
        Ok(tx.staged.deliveries.get(order_id).cloned())
    }

    async fn delete_delivery_by_order_id(
        &self,
        tx: &mut MemoryTx,
        order_id: &str,
    ) -> Result<(), RepositoryError> {
        self.check(FailPoint::DeleteDelivery)?;
        tx.staged.deliveries.remove(order_id);
        Ok(())
    }

    async fn has_unexpired_delivery(
        &self,
        tx: &mut MemoryTx,
        courier_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(tx
            .staged
            .deliveries
            .values()
            .any(|delivery| delivery.courier_id == courier_id && delivery.deadline >= now))
    }

    async fn release_expired_couriers(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.check(FailPoint::ReleaseExpired)?;
        let mut tables = self.tables.lock().await;
        let Tables {
            couriers,
            deliveries,
        } = &mut *tables;

        let mut released = 0;
        for courier in couriers.values_mut() {
            if courier.status != CourierStatus::Busy {
                continue;
            }
            let courier_id = courier.id;
            let mut owned = deliveries
                .values()
                .filter(|delivery| delivery.courier_id == courier_id)
                .peekable();
            if owned.peek().is_none() {
                continue;
            }
            if owned.all(|delivery| delivery.is_expired_at(now)) {
                courier.status = CourierStatus::Available;
                courier.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn create_courier(
        &self,
        courier: NewCourier,
        now: DateTime<Utc>,
    ) -> Result<Courier, RepositoryError> {
        let courier = Courier {
            id: Uuid::new_v4(),
            name: courier.name,
            phone: courier.phone,
            status: CourierStatus::Available,
            transport_type: courier.transport_type,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .lock()
            .await
            .couriers
            .insert(courier.id, courier.clone());
        Ok(courier)
    }

    async fn list_couriers(&self) -> Result<Vec<Courier>, RepositoryError> {
        Ok(self.tables.lock().await.couriers.values().cloned().collect())
    }

    async fn get_courier(&self, courier_id: Uuid) -> Result<Option<Courier>, RepositoryError> {
        Ok(self.tables.lock().await.couriers.get(&courier_id).cloned())
    }

    async fn set_courier_status(
        &self,
        courier_id: Uuid,
        status: CourierStatus,
        now: DateTime<Utc>,
    ) -> Result<Courier, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let courier = tables
            .couriers
            .get_mut(&courier_id)
            .ok_or(RepositoryError::CourierNotFound)?;
        if courier.status == CourierStatus::Busy {
            return Err(RepositoryError::CourierBusy);
        }
        courier.status = status;
        courier.updated_at = now;
        Ok(courier.clone())
    }

    async fn list_deliveries(&self) -> Result<Vec<Delivery>, RepositoryError> {
        Ok(self.tables.lock().await.deliveries.values().cloned().collect())
    }
}
