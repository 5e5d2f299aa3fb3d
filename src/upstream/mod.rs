//! Client side of the upstream order service.

pub mod grpc;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::models::order::Order;

pub use grpc::GrpcOrderClient;
pub use retry::{RetryPolicy, RetryingOrderLookup};

/// Read access to canonical order state.
///
/// A missing order is reported as [`tonic::Code::NotFound`]. The token is the
/// caller's context: implementations give up once it is cancelled.
#[async_trait]
pub trait OrderLookup: Send + Sync {
    async fn get_by_id(&self, ctx: &CancellationToken, id: &str) -> Result<Order, Status>;

    async fn list_from(
        &self,
        ctx: &CancellationToken,
        from: DateTime<Utc>,
    ) -> Result<Vec<Order>, Status>;
}
