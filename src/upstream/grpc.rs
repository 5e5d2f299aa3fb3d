use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use crate::models::order::Order;
use crate::upstream::OrderLookup;

/// Wire messages of `orders.v1.OrderService`.
pub mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetOrderRequest {
        #[prost(string, tag = "1")]
        pub id: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListOrdersRequest {
        #[prost(int64, tag = "1")]
        pub from_unix_ms: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct OrderMessage {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub status: String,
        #[prost(int64, tag = "3")]
        pub created_at_unix_ms: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListOrdersResponse {
        #[prost(message, repeated, tag = "1")]
        pub orders: Vec<OrderMessage>,
    }
}

const GET_ORDER_PATH: &str = "/orders.v1.OrderService/GetOrder";
const LIST_ORDERS_PATH: &str = "/orders.v1.OrderService/ListOrders";

impl TryFrom<pb::OrderMessage> for Order {
    type Error = Status;

    fn try_from(message: pb::OrderMessage) -> Result<Self, Self::Error> {
        let created_at = DateTime::<Utc>::from_timestamp_millis(message.created_at_unix_ms)
            .ok_or_else(|| {
                Status::internal(format!(
                    "order {} has invalid created_at {}",
                    message.id, message.created_at_unix_ms
                ))
            })?;
        Ok(Order {
            id: message.id,
            status: message.status,
            created_at,
        })
    }
}

/// Unary client for the upstream order service.
///
/// The channel connects lazily, so an unreachable service shows up as
/// `Unavailable` on the first call rather than at startup.
#[derive(Debug, Clone)]
pub struct GrpcOrderClient {
    grpc: Grpc<Channel>,
    timeout: Duration,
}

impl GrpcOrderClient {
    pub fn connect_lazy(url: &str, timeout: Duration) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(url.to_string())?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        Ok(Self {
            grpc: Grpc::new(channel),
            timeout,
        })
    }

    async fn unary<Req, Resp>(
        &self,
        ctx: &CancellationToken,
        path: &'static str,
        message: Req,
    ) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        if ctx.is_cancelled() {
            return Err(Status::cancelled("caller gave up before the call"));
        }

        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|err| Status::unavailable(format!("order service not ready: {err}")))?;

        let mut request = tonic::Request::new(message);
        request.set_timeout(self.timeout);
        let codec = ProstCodec::<Req, Resp>::default();

        tokio::select! {
            response = grpc.unary(request, PathAndQuery::from_static(path), codec) => {
                response.map(tonic::Response::into_inner)
            }
            _ = ctx.cancelled() => Err(Status::cancelled("caller gave up during the call")),
        }
    }
}

#[async_trait]
impl OrderLookup for GrpcOrderClient {
    async fn get_by_id(&self, ctx: &CancellationToken, id: &str) -> Result<Order, Status> {
        let request = pb::GetOrderRequest { id: id.to_string() };
        let message: pb::OrderMessage = self.unary(ctx, GET_ORDER_PATH, request).await?;
        Order::try_from(message)
    }

    async fn list_from(
        &self,
        ctx: &CancellationToken,
        from: DateTime<Utc>,
    ) -> Result<Vec<Order>, Status> {
        let request = pb::ListOrdersRequest {
            from_unix_ms: from.timestamp_millis(),
        };
        let response: pb::ListOrdersResponse = self.unary(ctx, LIST_ORDERS_PATH, request).await?;
        response.orders.into_iter().map(Order::try_from).collect()
    }
}
