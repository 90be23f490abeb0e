//! Core types for the fund market

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MarketError;

/// Identifier of an asset within one asset ledger
pub type AssetId = u64;

/// Identifier of a marketplace listing
pub type ListingId = u64;

/// Token and asset quantities (18-decimal token amounts fit comfortably)
pub type Amount = u128;

/// Basis points denominator for fee rates
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Account identity
///
/// Externally-owned accounts, the marketplace escrow account and contract
/// addresses all share this representation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create a new address
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the raw address string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Name of a deployed ledger contract (e.g. `FundCertificate`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    /// Create a new contract id
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the raw contract name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One entry of a purchase batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    /// Listing to buy from
    pub listing_id: ListingId,
    /// Units requested
    pub quantity: Amount,
}

impl Lot {
    /// Create a new lot
    pub fn new(listing_id: ListingId, quantity: Amount) -> Self {
        Self {
            listing_id,
            quantity,
        }
    }
}

impl From<(ListingId, Amount)> for Lot {
    fn from((listing_id, quantity): (ListingId, Amount)) -> Self {
        Self::new(listing_id, quantity)
    }
}

/// Split of a single payment between fee and payee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Amount debited from the payer
    pub gross: Amount,
    /// Marketplace fee
    pub fee: Amount,
    /// Amount credited to the payee
    pub net: Amount,
}

impl Settlement {
    /// Settlement without a fee
    pub fn without_fee(gross: Amount) -> Self {
        Self {
            gross,
            fee: 0,
            net: gross,
        }
    }

    /// Split `gross` with a fee rate in basis points (rounded down)
    pub fn with_fee_bps(gross: Amount, fee_bps: u32) -> Result<Self, MarketError> {
        if fee_bps > BPS_DENOMINATOR {
            return Err(MarketError::InvalidAmount(format!(
                "fee of {} bps exceeds {}",
                fee_bps, BPS_DENOMINATOR
            )));
        }
        let fee = gross
            .checked_mul(Amount::from(fee_bps))
            .ok_or(MarketError::Overflow)?
            / Amount::from(BPS_DENOMINATOR);
        Ok(Self {
            gross,
            fee,
            net: gross - fee,
        })
    }

    /// Check that the parts add up
    pub fn is_balanced(&self) -> bool {
        self.fee.checked_add(self.net) == Some(self.gross)
    }
}
