//! Tariff book: tier lookup and pricing entry points

use crate::{
    table::TariffTable, ChargeBreakdown, Dimensions, Direction, Error, Result, Tier, Zone,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// All tariff tables, keyed by tier
#[derive(Debug, Clone)]
pub struct TariffBook {
    tables: BTreeMap<Tier, TariffTable>,
}

impl TariffBook {
    /// Build from tables, validating each one
    pub fn new(tables: impl IntoIterator<Item = (Tier, TariffTable)>) -> Result<Self> {
        let tables: BTreeMap<Tier, TariffTable> = tables.into_iter().collect();

        if tables.is_empty() {
            return Err(Error::InvalidTable("Tariff book has no tiers".to_string()));
        }

        for (tier, table) in &tables {
            table
                .validate()
                .map_err(|e| Error::InvalidTable(format!("tier '{}': {}", tier, e)))?;
        }

        tracing::debug!(tiers = tables.len(), "Tariff book loaded");

        Ok(Self { tables })
    }

    /// Built-in `basic`, `advanced` and `pro` tables
    pub fn standard() -> Self {
        let tables = [
            (Tier::new("basic"), TariffTable::standard_basic()),
            (Tier::new("advanced"), TariffTable::standard_advanced()),
            (Tier::new("pro"), TariffTable::standard_pro()),
        ];
        Self {
            tables: tables.into_iter().collect(),
        }
    }

    /// Table for a tier
    pub fn table(&self, tier: &Tier) -> Result<&TariffTable> {
        self.tables
            .get(tier)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown tier '{}'", tier)))
    }

    /// Known tiers
    pub fn tiers(&self) -> impl Iterator<Item = &Tier> {
        self.tables.keys()
    }

    /// Price a shipment whose volumetric weight is already known.
    ///
    /// Chargeable weight is `max(actual, volumetric)`.
    pub fn price(
        &self,
        tier: &Tier,
        direction: Direction,
        zone: Zone,
        actual_weight_grams: u32,
        volumetric_weight_grams: u32,
        cod_amount: Decimal,
    ) -> Result<ChargeBreakdown> {
        let table = self.table(tier)?;

        if actual_weight_grams == 0 {
            return Err(Error::InvalidInput("Actual weight must be positive".to_string()));
        }
        if cod_amount < Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "COD amount must not be negative, got {}",
                cod_amount
            )));
        }

        let chargeable_weight_grams = actual_weight_grams.max(volumetric_weight_grams);
        let freight_charge = table.freight(direction, zone, chargeable_weight_grams)?;
        let cod_charge = table.cod.charge(cod_amount);

        Ok(ChargeBreakdown {
            tier: tier.clone(),
            direction,
            zone,
            chargeable_weight_grams,
            freight_charge,
            cod_charge,
            total: freight_charge + cod_charge,
        })
    }

    /// Price a shipment from its dimensions. Read-only, no side effects.
    pub fn quote(
        &self,
        tier: &Tier,
        direction: Direction,
        zone: Zone,
        actual_weight_grams: u32,
        dimensions: Option<&Dimensions>,
        cod_amount: Decimal,
    ) -> Result<ChargeBreakdown> {
        let volumetric = match dimensions {
            Some(dims) => dims.volumetric_weight_grams()?,
            None => 0,
        };
        self.price(tier, direction, zone, actual_weight_grams, volumetric, cod_amount)
    }
}

impl Default for TariffBook {
    fn default() -> Self {
        Self::standard()
    }
}
