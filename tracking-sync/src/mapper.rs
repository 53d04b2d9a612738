//! Carrier status vocabulary
//!
//! Carrier strings are matched after trimming, lowercasing and collapsing
//! runs of spaces, underscores and hyphens into one space. Anything not in
//! the table maps to `None` and the caller leaves the shipment unchanged.

use billing::ShipmentStatus;
use std::collections::HashMap;

const STANDARD_MAPPINGS: &[(&str, ShipmentStatus)] = &[
    ("manifested", ShipmentStatus::Booked),
    ("pending", ShipmentStatus::Booked),
    ("pickup scheduled", ShipmentStatus::Booked),
    ("not picked", ShipmentStatus::Booked),
    ("picked up", ShipmentStatus::PickedUp),
    ("pickup completed", ShipmentStatus::PickedUp),
    ("in transit", ShipmentStatus::InTransit),
    ("dispatched", ShipmentStatus::InTransit),
    ("reached at destination hub", ShipmentStatus::InTransit),
    ("out for delivery", ShipmentStatus::OutForDelivery),
    ("undelivered", ShipmentStatus::Undelivered),
    ("delivery attempted", ShipmentStatus::Undelivered),
    ("ndr", ShipmentStatus::Undelivered),
    ("rto", ShipmentStatus::RtoInitiated),
    ("rto initiated", ShipmentStatus::RtoInitiated),
    ("rto in transit", ShipmentStatus::RtoInTransit),
    ("rto delivered", ShipmentStatus::RtoDelivered),
    ("returned to origin", ShipmentStatus::RtoDelivered),
    ("delivered", ShipmentStatus::Delivered),
    ("cancelled", ShipmentStatus::Cancelled),
    ("canceled", ShipmentStatus::Cancelled),
    ("lost", ShipmentStatus::Lost),
];

/// Table-driven, case-insensitive status mapping
#[derive(Debug, Clone)]
pub struct StatusMapper {
    table: HashMap<String, ShipmentStatus>,
}

impl StatusMapper {
    /// Standard carrier vocabulary plus the internal status names
    pub fn standard() -> Self {
        let mut table: HashMap<String, ShipmentStatus> = ShipmentStatus::ALL
            .iter()
            .map(|s| (normalize(s.as_str()), *s))
            .collect();
        table.extend(
            STANDARD_MAPPINGS
                .iter()
                .map(|(raw, status)| (normalize(raw), *status)),
        );
        Self { table }
    }

    /// Standard table with extra or overriding entries
    pub fn with_extra<'a>(extra: impl IntoIterator<Item = (&'a String, &'a ShipmentStatus)>) -> Self {
        let mut mapper = Self::standard();
        for (raw, status) in extra {
            mapper.table.insert(normalize(raw), *status);
        }
        mapper
    }

    /// Map a carrier string; `None` if unknown
    pub fn map(&self, raw: &str) -> Option<ShipmentStatus> {
        self.table.get(&normalize(raw)).copied()
    }
}

impl Default for StatusMapper {
    fn default() -> Self {
        Self::standard()
    }
}

fn normalize(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_case_insensitive() {
        let mapper = StatusMapper::standard();
        assert_eq!(mapper.map("DELIVERED"), Some(ShipmentStatus::Delivered));
        assert_eq!(mapper.map("  Out   For Delivery "), Some(ShipmentStatus::OutForDelivery));
        assert_eq!(mapper.map("RTO-In_Transit"), Some(ShipmentStatus::RtoInTransit));
        assert_eq!(mapper.map("rto_delivered"), Some(ShipmentStatus::RtoDelivered));
    }

    #[test]
    fn test_unknown_is_none() {
        let mapper = StatusMapper::standard();
        assert_eq!(mapper.map("Shipment Held At Hub"), None);
        assert_eq!(mapper.map(""), None);
    }

    #[test]
    fn test_extra_mappings() {
        let mut extra = BTreeMap::new();
        extra.insert("Shipment Held At Hub".to_string(), ShipmentStatus::InTransit);
        extra.insert("Lost".to_string(), ShipmentStatus::Undelivered);

        let mapper = StatusMapper::with_extra(&extra);
        assert_eq!(mapper.map("shipment held at hub"), Some(ShipmentStatus::InTransit));
        // Extras override the standard table
        assert_eq!(mapper.map("LOST"), Some(ShipmentStatus::Undelivered));
    }
}
