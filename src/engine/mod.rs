pub mod assignment;
pub mod events;
pub mod expiry;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::courier::{Courier, CourierStatus, NewCourier};
use crate::models::delivery::{AssignResult, Delivery, UnassignResult};
use crate::storage::RepositoryError;

pub use assignment::AssignmentEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("order id must not be blank")]
    InvalidOrderId,

    #[error("no available courier")]
    NoAvailableCourier,

    #[error("order {0} already has a delivery")]
    AlreadyAssigned(String),

    #[error("no delivery for order {0}")]
    DeliveryNotFound(String),

    #[error("courier has unknown transport type: {0}")]
    UnknownTransport(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::UnknownTransport(raw) => EngineError::UnknownTransport(raw),
            other => EngineError::Repository(other),
        }
    }
}

/// Reservation operations, as seen by callers that do not care which
/// repository backs them.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn assign(&self, order_id: &str) -> Result<AssignResult, EngineError>;

    async fn unassign(&self, order_id: &str) -> Result<UnassignResult, EngineError>;

    /// Returns the number of couriers released.
    async fn release_expired(&self) -> Result<u64, EngineError>;
}

/// Courier administration plus the live assignment feed.
#[async_trait]
pub trait Fleet: Send + Sync {
    async fn register_courier(&self, courier: NewCourier) -> Result<Courier, RepositoryError>;

    async fn couriers(&self) -> Result<Vec<Courier>, RepositoryError>;

    /// Only `available` and `paused` may be set here.
    async fn set_courier_status(
        &self,
        courier_id: Uuid,
        status: CourierStatus,
    ) -> Result<Courier, RepositoryError>;

    async fn deliveries(&self) -> Result<Vec<Delivery>, RepositoryError>;

    fn subscribe(&self) -> broadcast::Receiver<AssignResult>;
}
