//! Shipment vocabulary shared by billing and tracking

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tariff_engine::{Dimensions, Tier, Zone};
use wallet_ledger::MerchantId;

/// Internal shipment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    /// Order created, awaiting pickup
    Booked,
    /// Handed to the carrier
    PickedUp,
    /// Moving through the network
    InTransit,
    /// With the last-mile courier
    OutForDelivery,
    /// Delivery attempt failed
    Undelivered,
    /// Return to origin started
    RtoInitiated,
    /// Return leg under way
    RtoInTransit,
    /// Returned to the merchant
    RtoDelivered,
    /// Delivered to the consignee
    Delivered,
    /// Cancelled before pickup
    Cancelled,
    /// Lost by the carrier
    Lost,
}

/// Counter bucket a status contributes to in a cycle summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Not yet picked up
    Pending,
    /// With the carrier, forward leg
    InTransit,
    /// Returning to origin
    Rto,
    /// Delivered
    Delivered,
    /// Cancelled
    Cancelled,
    /// Lost
    Lost,
}

impl ShipmentStatus {
    /// Every status, in lifecycle order
    pub const ALL: [ShipmentStatus; 11] = [
        ShipmentStatus::Booked,
        ShipmentStatus::PickedUp,
        ShipmentStatus::InTransit,
        ShipmentStatus::OutForDelivery,
        ShipmentStatus::Undelivered,
        ShipmentStatus::RtoInitiated,
        ShipmentStatus::RtoInTransit,
        ShipmentStatus::RtoDelivered,
        ShipmentStatus::Delivered,
        ShipmentStatus::Cancelled,
        ShipmentStatus::Lost,
    ];

    /// No further tracking is needed once reached
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShipmentStatus::Delivered
                | ShipmentStatus::Cancelled
                | ShipmentStatus::RtoDelivered
                | ShipmentStatus::Lost
        )
    }

    /// Summary bucket
    pub fn outcome(&self) -> Outcome {
        match self {
            ShipmentStatus::Booked => Outcome::Pending,
            ShipmentStatus::PickedUp
            | ShipmentStatus::InTransit
            | ShipmentStatus::OutForDelivery
            | ShipmentStatus::Undelivered => Outcome::InTransit,
            ShipmentStatus::RtoInitiated
            | ShipmentStatus::RtoInTransit
            | ShipmentStatus::RtoDelivered => Outcome::Rto,
            ShipmentStatus::Delivered => Outcome::Delivered,
            ShipmentStatus::Cancelled => Outcome::Cancelled,
            ShipmentStatus::Lost => Outcome::Lost,
        }
    }

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Booked => "booked",
            ShipmentStatus::PickedUp => "picked_up",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::OutForDelivery => "out_for_delivery",
            ShipmentStatus::Undelivered => "undelivered",
            ShipmentStatus::RtoInitiated => "rto_initiated",
            ShipmentStatus::RtoInTransit => "rto_in_transit",
            ShipmentStatus::RtoDelivered => "rto_delivered",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Cancelled => "cancelled",
            ShipmentStatus::Lost => "lost",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown shipment status '{}'", s)))
    }
}

/// How the consignee pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Paid up front by the merchant
    Prepaid,
    /// Collected on delivery
    Cod,
}

/// A shipment as submitted by the order flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    /// Marketplace shipment id, unique across merchants
    pub shipment_id: String,

    /// Owner
    pub merchant_id: MerchantId,

    /// Merchant pricing tier
    pub tier: Tier,

    /// Carrier waybill, if already assigned
    pub tracking_id: Option<String>,

    /// Canonical zone
    pub zone: Zone,

    /// Declared dead weight
    pub declared_weight_grams: u32,

    /// Package dimensions
    pub dimensions: Option<Dimensions>,

    /// Amount to collect on delivery, zero for prepaid
    pub cod_amount: Decimal,

    /// Order creation time; selects the billing cycle
    pub created_at: DateTime<Utc>,
}

impl Shipment {
    /// Derived from the COD amount
    pub fn payment_mode(&self) -> PaymentMode {
        if self.cod_amount > Decimal::ZERO {
            PaymentMode::Cod
        } else {
            PaymentMode::Prepaid
        }
    }
}
