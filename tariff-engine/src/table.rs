//! Tariff tables
//!
//! A table is an ordered list of weight slabs per direction. Each slab covers
//! `(from_grams, to_grams]` and is either flat (the price for any weight in
//! range) or incremental (a per-step price added on top of the flat slab
//! right before it, its *anchor*).
//!
//! The standard ladder therefore looks like:
//!
//! ```text
//! (0, 250]        flat          upto 250 g
//! (250, 500]      flat          upto 500 g
//! (500, 4999]     +500 g steps  anchored on upto 500 g
//! (4999, 5000]    flat          upto 5 kg checkpoint
//! (5000, 9999]    +1 kg steps   anchored on upto 5 kg
//! (9999, 10000]   flat          upto 10 kg checkpoint
//! (10000, ∞)      +1 kg steps   anchored on upto 10 kg
//! ```

use crate::{Direction, Error, Result, Zone};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// One price per zone, in [`Zone::ALL`] order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRates(pub [Decimal; 6]);

impl ZoneRates {
    /// Price for a zone
    pub fn get(&self, zone: Zone) -> Decimal {
        self.0[zone.index()]
    }

    fn from_units(units: [i64; 6]) -> Self {
        Self(units.map(Decimal::from))
    }
}

/// How a slab turns weight into price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlabKind {
    /// Same price for every weight in range
    Flat,
    /// Anchor price plus one rate per started step beyond `from_grams`
    Incremental {
        /// Step size in grams
        step_grams: u32,
    },
}

/// Weight slab rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlabRule {
    /// Human label ("upto 5 kg", "+500 g")
    pub label: String,

    /// Exclusive lower bound
    pub from_grams: u32,

    /// Inclusive upper bound, `None` for the open-ended last slab
    #[serde(default)]
    pub to_grams: Option<u32>,

    /// Flat or incremental
    #[serde(flatten)]
    pub kind: SlabKind,

    /// Flat price or per-step price, per zone
    pub rates: ZoneRates,
}

impl SlabRule {
    fn flat(label: &str, from_grams: u32, to_grams: u32, rates: [i64; 6]) -> Self {
        Self {
            label: label.to_string(),
            from_grams,
            to_grams: Some(to_grams),
            kind: SlabKind::Flat,
            rates: ZoneRates::from_units(rates),
        }
    }

    fn incremental(
        label: &str,
        from_grams: u32,
        to_grams: Option<u32>,
        step_grams: u32,
        rates: [i64; 6],
    ) -> Self {
        Self {
            label: label.to_string(),
            from_grams,
            to_grams,
            kind: SlabKind::Incremental { step_grams },
            rates: ZoneRates::from_units(rates),
        }
    }

    /// Whether `grams` falls in `(from_grams, to_grams]`
    pub fn contains(&self, grams: u32) -> bool {
        grams > self.from_grams && self.to_grams.map_or(true, |to| grams <= to)
    }
}

/// COD handling fee rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodRule {
    /// Fraction of the COD amount (0.02 = 2%)
    pub percentage: Decimal,

    /// Floor for the fee
    pub minimum_amount: Decimal,

    /// Add GST on top of the fee
    pub gst_applies: bool,
}

/// GST rate added to COD fees
pub const COD_GST_RATE: Decimal = dec!(0.18);

impl CodRule {
    /// Fee for collecting `cod_amount`. Prepaid shipments (zero) pay nothing.
    pub fn charge(&self, cod_amount: Decimal) -> Decimal {
        if cod_amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let fee = (cod_amount * self.percentage).max(self.minimum_amount);
        if self.gst_applies {
            fee + fee * COD_GST_RATE
        } else {
            fee
        }
    }
}

/// Full tariff for one merchant tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffTable {
    /// Forward slabs
    pub forward: Vec<SlabRule>,

    /// Return-to-origin slabs
    pub rto: Vec<SlabRule>,

    /// COD fee rule
    pub cod: CodRule,
}

impl TariffTable {
    /// Slabs for a direction
    pub fn slabs(&self, direction: Direction) -> &[SlabRule] {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Rto => &self.rto,
        }
    }

    /// Check the slab invariants for both directions
    pub fn validate(&self) -> Result<()> {
        validate_slabs(Direction::Forward, &self.forward)?;
        validate_slabs(Direction::Rto, &self.rto)?;

        if self.cod.percentage < Decimal::ZERO || self.cod.minimum_amount < Decimal::ZERO {
            return Err(Error::InvalidTable(
                "COD percentage and minimum must be non-negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Ladder price for a chargeable weight
    pub fn freight(&self, direction: Direction, zone: Zone, grams: u32) -> Result<Decimal> {
        let slabs = self.slabs(direction);

        let idx = slabs
            .iter()
            .position(|slab| slab.contains(grams))
            .ok_or_else(|| {
                Error::InvalidInput(format!("No {} slab covers {} g", direction, grams))
            })?;
        let slab = &slabs[idx];

        match slab.kind {
            SlabKind::Flat => Ok(slab.rates.get(zone)),
            SlabKind::Incremental { step_grams } => {
                // validate() guarantees idx > 0 and a flat anchor
                let anchor = idx
                    .checked_sub(1)
                    .and_then(|i| slabs.get(i))
                    .ok_or_else(|| Error::InvalidTable(format!("Slab '{}' has no anchor", slab.label)))?;

                let beyond = grams - slab.from_grams;
                let steps = beyond.div_ceil(step_grams);

                Ok(anchor.rates.get(zone) + Decimal::from(steps) * slab.rates.get(zone))
            }
        }
    }

    /// Standard table for the `basic` tier
    pub fn standard_basic() -> Self {
        Self {
            forward: ladder([
                [29, 33, 38, 42, 52, 58],
                [34, 38, 44, 49, 60, 68],
                [28, 32, 37, 41, 50, 57],
                [280, 318, 370, 410, 500, 570],
                [48, 55, 63, 70, 85, 96],
                [510, 580, 670, 745, 905, 1020],
                [45, 52, 60, 66, 80, 90],
            ]),
            rto: ladder([
                [26, 30, 34, 38, 47, 52],
                [31, 34, 40, 44, 54, 61],
                [25, 29, 33, 37, 45, 51],
                [252, 286, 333, 369, 450, 513],
                [43, 50, 57, 63, 77, 86],
                [459, 522, 603, 671, 815, 918],
                [41, 47, 54, 59, 72, 81],
            ]),
            cod: CodRule {
                percentage: dec!(0.02),
                minimum_amount: dec!(35),
                gst_applies: true,
            },
        }
    }

    /// Standard table for the `advanced` tier
    pub fn standard_advanced() -> Self {
        Self {
            forward: ladder([
                [27, 30, 35, 38, 47, 53],
                [31, 35, 40, 45, 55, 62],
                [26, 29, 34, 37, 46, 52],
                [255, 290, 337, 373, 455, 519],
                [44, 50, 57, 64, 77, 87],
                [464, 528, 610, 678, 824, 928],
                [41, 47, 55, 60, 73, 82],
            ]),
            rto: ladder([
                [24, 27, 32, 34, 42, 48],
                [28, 32, 36, 41, 50, 56],
                [23, 26, 31, 33, 41, 47],
                [230, 261, 303, 336, 410, 467],
                [40, 45, 51, 58, 69, 78],
                [418, 475, 549, 610, 742, 835],
                [37, 42, 50, 54, 66, 74],
            ]),
            cod: CodRule {
                percentage: dec!(0.0175),
                minimum_amount: dec!(32),
                gst_applies: true,
            },
        }
    }

    /// Standard table for the `pro` tier
    pub fn standard_pro() -> Self {
        Self {
            forward: ladder([
                [24, 27, 31, 34, 43, 48],
                [28, 31, 36, 40, 49, 56],
                [23, 26, 30, 34, 41, 47],
                [230, 261, 303, 336, 410, 467],
                [39, 45, 52, 57, 70, 79],
                [418, 476, 549, 611, 742, 836],
                [37, 43, 49, 54, 66, 74],
            ]),
            rto: ladder([
                [22, 24, 28, 31, 39, 43],
                [25, 28, 32, 36, 44, 50],
                [21, 23, 27, 31, 37, 42],
                [207, 235, 273, 302, 369, 420],
                [35, 41, 47, 51, 63, 71],
                [376, 428, 494, 550, 668, 752],
                [33, 39, 44, 49, 59, 67],
            ]),
            cod: CodRule {
                percentage: dec!(0.015),
                minimum_amount: dec!(30),
                gst_applies: false,
            },
        }
    }
}

/// Build the standard checkpoint ladder from seven price rows:
/// upto 250 g, upto 500 g, +500 g, upto 5 kg, +1 kg (5-10 kg), upto 10 kg,
/// +1 kg (beyond 10 kg).
fn ladder(rows: [[i64; 6]; 7]) -> Vec<SlabRule> {
    let [upto_250, upto_500, add_500, upto_5kg, add_1kg, upto_10kg, add_1kg_beyond] = rows;

    vec![
        SlabRule::flat("upto 250 g", 0, 250, upto_250),
        SlabRule::flat("upto 500 g", 250, 500, upto_500),
        SlabRule::incremental("+500 g", 500, Some(4_999), 500, add_500),
        SlabRule::flat("upto 5 kg", 4_999, 5_000, upto_5kg),
        SlabRule::incremental("+1 kg", 5_000, Some(9_999), 1_000, add_1kg),
        SlabRule::flat("upto 10 kg", 9_999, 10_000, upto_10kg),
        SlabRule::incremental("+1 kg beyond 10 kg", 10_000, None, 1_000, add_1kg_beyond),
    ]
}

fn validate_slabs(direction: Direction, slabs: &[SlabRule]) -> Result<()> {
    let first = slabs
        .first()
        .ok_or_else(|| Error::InvalidTable(format!("No {} slabs", direction)))?;

    if first.from_grams != 0 {
        return Err(Error::InvalidTable(format!(
            "First {} slab starts at {} g, expected 0",
            direction, first.from_grams
        )));
    }

    for (idx, slab) in slabs.iter().enumerate() {
        if let Some(to) = slab.to_grams {
            if to <= slab.from_grams {
                return Err(Error::InvalidTable(format!(
                    "Slab '{}' has empty range ({}, {}]",
                    slab.label, slab.from_grams, to
                )));
            }
        }

        if slab.rates.0.iter().any(|rate| *rate < Decimal::ZERO) {
            return Err(Error::InvalidTable(format!("Slab '{}' has a negative rate", slab.label)));
        }

        if let SlabKind::Incremental { step_grams } = slab.kind {
            if step_grams == 0 {
                return Err(Error::InvalidTable(format!("Slab '{}' has zero step", slab.label)));
            }
            let anchored = idx > 0 && matches!(slabs[idx - 1].kind, SlabKind::Flat);
            if !anchored {
                return Err(Error::InvalidTable(format!(
                    "Incremental slab '{}' must follow a flat slab",
                    slab.label
                )));
            }
        }

        match (slab.to_grams, slabs.get(idx + 1)) {
            (Some(to), Some(next)) if next.from_grams != to => {
                return Err(Error::InvalidTable(format!(
                    "Gap or overlap between '{}' (ends {} g) and '{}' (starts {} g)",
                    slab.label, to, next.label, next.from_grams
                )));
            }
            (None, Some(next)) => {
                return Err(Error::InvalidTable(format!(
                    "Open-ended slab '{}' is followed by '{}'",
                    slab.label, next.label
                )));
            }
            (Some(to), None) => {
                return Err(Error::InvalidTable(format!(
                    "Last {} slab ends at {} g, must be open-ended",
                    direction, to
                )));
            }
            _ => {}
        }
    }

    Ok(())
}
