//! Errors for ledger and marketplace operations

use thiserror::Error;

use crate::types::{Address, Amount, AssetId, ContractId, ListingId};

/// Errors that can occur with ledger and marketplace operations
///
/// A failed call never leaves a partial change behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: Address, action: String },

    #[error("{0} is not a registered publisher")]
    NotPublisher(Address),

    #[error("{operator} is not approved to move assets of {owner}")]
    NotApproved { owner: Address, operator: Address },

    #[error("Insufficient balance for {account}: available {available}, required {required}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        required: Amount,
    },

    #[error(
        "Insufficient allowance from {owner} to {spender}: available {available}, required {required}"
    )]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        available: Amount,
        required: Amount,
    },

    #[error(
        "Insufficient holding of asset {asset_id} for {account}: available {available}, required {required}"
    )]
    InsufficientAsset {
        account: Address,
        asset_id: AssetId,
        available: Amount,
        required: Amount,
    },

    #[error("Listing {listing_id} has {remaining} remaining, {requested} requested")]
    InsufficientListing {
        listing_id: ListingId,
        remaining: Amount,
        requested: Amount,
    },

    #[error("Listing not found: {0}")]
    ListingNotFound(ListingId),

    #[error("Listing {0} is no longer open")]
    ListingClosed(ListingId),

    #[error("Asset {asset_id} not found on {contract}")]
    AssetNotFound {
        contract: ContractId,
        asset_id: AssetId,
    },

    #[error("Contract not found: {0}")]
    ContractNotFound(ContractId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Arithmetic overflow")]
    Overflow,
}

impl MarketError {
    /// Build an authorization error
    pub fn unauthorized(caller: &Address, action: impl Into<String>) -> Self {
        Self::Unauthorized {
            caller: caller.clone(),
            action: action.into(),
        }
    }

    /// Whether the caller lacked rights for the operation
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::NotPublisher(_) | Self::NotApproved { .. }
        )
    }

    /// Whether a balance, allowance, holding or listing was too small
    pub fn is_insufficient(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. }
                | Self::InsufficientAllowance { .. }
                | Self::InsufficientAsset { .. }
                | Self::InsufficientListing { .. }
        )
    }

    /// Whether a referenced entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ListingNotFound(_) | Self::AssetNotFound { .. } | Self::ContractNotFound(_)
        )
    }
}

/// Result alias for marketplace operations
pub type Result<T> = std::result::Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_families() {
        let err = MarketError::NotPublisher(Address::new("0xbuyer"));
        assert!(err.is_authorization());
        assert!(!err.is_insufficient());

        let err = MarketError::InsufficientListing {
            listing_id: 3,
            remaining: 10,
            requested: 11,
        };
        assert!(err.is_insufficient());
        assert_eq!(
            err.to_string(),
            "Listing 3 has 10 remaining, 11 requested"
        );

        assert!(MarketError::ListingNotFound(9).is_not_found());
    }

    #[test]
    fn test_unauthorized_message() {
        let err = MarketError::unauthorized(&Address::new("0xmallory"), "add publishers");
        assert_eq!(err.to_string(), "0xmallory is not authorized to add publishers");
    }
}
