use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical order state as reported by the upstream order service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Order lifecycle event as delivered by the message queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderEvent {
    pub order_id: String,
    pub status: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderEvent {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEventKind {
    Created,
    Canceled,
    Completed,
    Unknown,
}

impl OrderEventKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => OrderEventKind::Created,
            "canceled" | "cancelled" | "deleted" => OrderEventKind::Canceled,
            "completed" => OrderEventKind::Completed,
            _ => OrderEventKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventKind::Created => "created",
            OrderEventKind::Canceled => "canceled",
            OrderEventKind::Completed => "completed",
            OrderEventKind::Unknown => "unknown",
        }
    }
}
