//! Core types for the tariff engine

use crate::{Error, Result, Zone};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Divisor turning cubic centimetres into volumetric kilograms
pub const VOLUMETRIC_DIVISOR: u32 = 5000;

/// Merchant pricing tier (`basic`, `advanced`, `pro`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tier(String);

impl Tier {
    /// Create new tier, normalized to lowercase
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which price table applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Outbound shipment to the buyer
    Forward,
    /// Return to origin
    Rto,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Rto => write!(f, "rto"),
        }
    }
}

/// Package dimensions in centimetres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Length (cm)
    pub length_cm: Decimal,
    /// Width (cm)
    pub width_cm: Decimal,
    /// Height (cm)
    pub height_cm: Decimal,
}

impl Dimensions {
    /// Create new dimensions
    pub fn new(length_cm: Decimal, width_cm: Decimal, height_cm: Decimal) -> Self {
        Self {
            length_cm,
            width_cm,
            height_cm,
        }
    }

    /// Volumetric weight in grams: L·W·H / 5000 kg, rounded up to the gram
    pub fn volumetric_weight_grams(&self) -> Result<u32> {
        if self.length_cm < Decimal::ZERO
            || self.width_cm < Decimal::ZERO
            || self.height_cm < Decimal::ZERO
        {
            return Err(Error::InvalidInput(format!(
                "Negative package dimension: {}x{}x{} cm",
                self.length_cm, self.width_cm, self.height_cm
            )));
        }

        let volume = self
            .length_cm
            .checked_mul(self.width_cm)
            .and_then(|v| v.checked_mul(self.height_cm))
            .ok_or_else(|| Error::InvalidInput("Package volume overflows".to_string()))?;

        let grams = (volume * Decimal::from(1000) / Decimal::from(VOLUMETRIC_DIVISOR)).ceil();

        grams
            .to_u32()
            .ok_or_else(|| Error::InvalidInput(format!("Volumetric weight {} g out of range", grams)))
    }
}

/// Result of pricing one shipment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeBreakdown {
    /// Tier the price was taken from
    pub tier: Tier,

    /// Forward or RTO table
    pub direction: Direction,

    /// Canonical zone
    pub zone: Zone,

    /// max(actual, volumetric) in grams
    pub chargeable_weight_grams: u32,

    /// Slab ladder price (forward or RTO)
    pub freight_charge: Decimal,

    /// COD handling fee, GST included when the rule says so
    pub cod_charge: Decimal,

    /// freight_charge + cod_charge
    pub total: Decimal,
}
