//! Merchant profiles

use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tariff_engine::Tier;
use wallet_ledger::MerchantId;

/// What settlement needs to know about a merchant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantProfile {
    /// Merchant
    pub merchant_id: MerchantId,
    /// Tariff tier
    pub tier: Tier,
    /// GST state code on invoices; required to finalize
    pub billing_state: Option<String>,
    /// State code of the pickup address; required to finalize
    pub pickup_state: Option<String>,
}

/// Registered merchants
#[derive(Debug, Default)]
pub struct MerchantRegistry {
    profiles: DashMap<MerchantId, MerchantProfile>,
}

impl MerchantRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile. Returns the previous one.
    pub fn upsert(&self, profile: MerchantProfile) -> Option<MerchantProfile> {
        self.profiles.insert(profile.merchant_id.clone(), profile)
    }

    /// Profile by id
    pub fn get(&self, merchant_id: &MerchantId) -> Result<MerchantProfile> {
        self.profiles
            .get(merchant_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| Error::MerchantNotFound(merchant_id.to_string()))
    }
}
