//! Pricing zones
//!
//! The carrier reports either one of the six zone letters or a legacy
//! sub-code from its two-band vocabulary:
//!
//! | Carrier code | Zone |
//! |--------------|------|
//! | `C1`, `C2`   | `C` (metro to metro) |
//! | `D1`, `D2`   | `D` (rest of country) |
//!
//! [`Zone::normalize`] collapses every accepted code to exactly one letter.
//! It is the only place a raw carrier code is interpreted.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Carrier pricing region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone {
    /// Within city
    A,
    /// Within region
    B,
    /// Metro to metro
    C,
    /// Rest of country
    D,
    /// Special locations (north-east, islands)
    E,
    /// Remote / restricted service areas
    F,
}

impl Zone {
    /// All zones in table column order
    pub const ALL: [Zone; 6] = [Zone::A, Zone::B, Zone::C, Zone::D, Zone::E, Zone::F];

    /// Column index into a [`ZoneRates`](crate::ZoneRates) row
    pub fn index(&self) -> usize {
        match self {
            Zone::A => 0,
            Zone::B => 1,
            Zone::C => 2,
            Zone::D => 3,
            Zone::E => 4,
            Zone::F => 5,
        }
    }

    /// Zone letter
    pub fn code(&self) -> &'static str {
        match self {
            Zone::A => "A",
            Zone::B => "B",
            Zone::C => "C",
            Zone::D => "D",
            Zone::E => "E",
            Zone::F => "F",
        }
    }

    /// Collapse a raw carrier code (letter or legacy sub-code) to a zone.
    ///
    /// Case-insensitive and whitespace-tolerant. Idempotent:
    /// `normalize(normalize(x).code()) == normalize(x)`.
    pub fn normalize(raw: &str) -> Result<Self> {
        let code = raw.trim().to_ascii_uppercase();
        let zone = match code.as_str() {
            "A" => Zone::A,
            "B" => Zone::B,
            "C" | "C1" | "C2" => Zone::C,
            "D" | "D1" | "D2" => Zone::D,
            "E" => Zone::E,
            "F" => Zone::F,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Unknown zone code '{}'",
                    raw.trim()
                )))
            }
        };
        Ok(zone)
    }
}

impl FromStr for Zone {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Zone::normalize(s)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
