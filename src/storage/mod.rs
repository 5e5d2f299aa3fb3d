//! Courier and delivery persistence.
//!
//! [`CourierRepository`] is the only component allowed to hold multi-step
//! mutable state. Every engine mutation goes through a transaction handle
//! (`Tx`); a handle that is dropped without [`CourierRepository::commit`]
//! discards all of its effects.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::courier::{Courier, CourierStatus, NewCourier};
use crate::models::delivery::Delivery;

pub use memory::MemoryRepository;
pub use postgres::PgCourierRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("order already has a delivery")]
    DuplicateOrder,

    #[error("courier not found")]
    CourierNotFound,

    #[error("courier is busy")]
    CourierBusy,

    #[error("unknown courier status: {0}")]
    UnknownStatus(String),

    #[error("unknown transport type: {0}")]
    UnknownTransport(String),
}

#[async_trait]
pub trait CourierRepository: Send + Sync + 'static {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), RepositoryError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), RepositoryError>;

    /// Locks and returns the least-loaded available courier.
    ///
    /// Candidates are ordered by number of delivery rows ascending, then by
    /// id ascending. The returned row stays locked until the transaction ends.
    async fn find_available_courier_for_update(
        &self,
        tx: &mut Self::Tx,
    ) -> Result<Option<Courier>, RepositoryError>;

    /// Locks and returns one courier row.
    async fn get_courier_for_update(
        &self,
        tx: &mut Self::Tx,
        courier_id: Uuid,
    ) -> Result<Option<Courier>, RepositoryError>;

    async fn update_courier_status(
        &self,
        tx: &mut Self::Tx,
        courier_id: Uuid,
        status: CourierStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Fails with [`RepositoryError::DuplicateOrder`] if the order already
    /// owns a delivery row.
    async fn insert_delivery(
        &self,
        tx: &mut Self::Tx,
        delivery: &Delivery,
    ) -> Result<(), RepositoryError>;

    async fn get_delivery_by_order_id(
        &self,
        tx: &mut Self::Tx,
        order_id: &str,
    ) -> Result<Option<Delivery>, RepositoryError>;

    async fn delete_delivery_by_order_id(
        &self,
        tx: &mut Self::Tx,
        order_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Whether any delivery of the courier has a deadline at or after `now`.
    async fn has_unexpired_delivery(
        &self,
        tx: &mut Self::Tx,
        courier_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Flips every busy courier whose deliveries have all expired back to
    /// available, in one statement. Delivery rows are left untouched.
    async fn release_expired_couriers(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;

    async fn create_courier(
        &self,
        courier: NewCourier,
        now: DateTime<Utc>,
    ) -> Result<Courier, RepositoryError>;

    async fn list_couriers(&self) -> Result<Vec<Courier>, RepositoryError>;

    async fn get_courier(&self, courier_id: Uuid) -> Result<Option<Courier>, RepositoryError>;

    /// Administrative status change. Refuses to touch a busy courier, since
    /// busy is owned by the assignment engine.
    async fn set_courier_status(
        &self,
        courier_id: Uuid,
        status: CourierStatus,
        now: DateTime<Utc>,
    ) -> Result<Courier, RepositoryError>;

    async fn list_deliveries(&self) -> Result<Vec<Delivery>, RepositoryError>;
}
