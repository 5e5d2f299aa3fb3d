use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::{CourierStatus, TransportType};

/// An open reservation of one courier for one order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub order_id: String,
    pub assigned_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl Delivery {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignResult {
    pub courier_id: Uuid,
    pub order_id: String,
    pub transport_type: TransportType,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnassignResult {
    pub courier_id: Uuid,
    pub order_id: String,
    pub status: CourierStatus,
}
