use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CourierStatus {
    Available,
    Busy,
    Paused,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierStatus::Available => "available",
            CourierStatus::Busy => "busy",
            CourierStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for CourierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourierStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "available" => Ok(CourierStatus::Available),
            "busy" => Ok(CourierStatus::Busy),
            "paused" => Ok(CourierStatus::Paused),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Foot,
    Scooter,
    Car,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Foot => "foot",
            TransportType::Scooter => "scooter",
            TransportType::Car => "car",
        }
    }

    /// Time a courier using this transport gets to complete a delivery.
    pub fn delivery_window(&self) -> Duration {
        match self {
            TransportType::Foot => Duration::minutes(30),
            TransportType::Scooter => Duration::minutes(15),
            TransportType::Car => Duration::minutes(5),
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "foot" => Ok(TransportType::Foot),
            "scooter" => Ok(TransportType::Scooter),
            "car" => Ok(TransportType::Car),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub status: CourierStatus,
    pub transport_type: TransportType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCourier {
    pub name: String,
    pub phone: String,
    pub transport_type: TransportType,
}
