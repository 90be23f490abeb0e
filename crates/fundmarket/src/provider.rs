//! Wrapper registry (FundCertProvider)
//!
//! Each issued fund certificate gets a wrapped-contract address derived
//! from the registry name, the asset id and the publisher.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{MarketError, Result};
use crate::types::{Address, Amount, AssetId, ContractId};

/// Wrapped contract created for one asset id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperRecord {
    pub asset_id: AssetId,
    pub address: Address,
    pub publisher: Address,
    pub supply: Amount,
}

/// Registry of wrapper contracts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperRegistry {
    pub contract: ContractId,
    pub owner: Address,
    creator: Option<ContractId>,
    wrappers: BTreeMap<AssetId, WrapperRecord>,
}

impl WrapperRegistry {
    pub fn new(contract: impl Into<ContractId>, owner: Address) -> Self {
        Self {
            contract: contract.into(),
            owner,
            creator: None,
            wrappers: BTreeMap::new(),
        }
    }

    /// Authorize one asset ledger to create wrappers
    pub fn set_creator(&mut self, caller: &Address, creator: ContractId) -> Result<()> {
        if caller != &self.owner {
            return Err(MarketError::unauthorized(
                caller,
                format!("set the creator of {}", self.contract),
            ));
        }
        self.creator = Some(creator);
        Ok(())
    }

    /// Ledger currently allowed to create wrappers
    pub fn creator(&self) -> Option<&ContractId> {
        self.creator.as_ref()
    }

    /// Fail unless `creator` may register a wrapper for `asset_id`
    pub fn check_create(&self, creator: &ContractId, asset_id: AssetId) -> Result<()> {
        if self.creator.as_ref() != Some(creator) {
            return Err(MarketError::unauthorized(
                &Address::new(creator.as_str()),
                format!("create wrappers on {}", self.contract),
            ));
        }
        if self.wrappers.contains_key(&asset_id) {
            return Err(MarketError::InvalidAmount(format!(
                "wrapper for asset {} already exists",
                asset_id
            )));
        }
        Ok(())
    }

    /// Register the wrapper of a freshly issued asset
    pub fn create_wrapper(
        &mut self,
        creator: &ContractId,
        asset_id: AssetId,
        publisher: &Address,
        supply: Amount,
    ) -> Result<Address> {
        self.check_create(creator, asset_id)?;

        let address = self.derive_address(asset_id, publisher);
        self.wrappers.insert(
            asset_id,
            WrapperRecord {
                asset_id,
                address: address.clone(),
                publisher: publisher.clone(),
                supply,
            },
        );
        Ok(address)
    }

    /// Address of the wrapper for `asset_id`, if created
    pub fn wrapper_address(&self, asset_id: AssetId) -> Option<&Address> {
        self.wrappers.get(&asset_id).map(|record| &record.address)
    }

    /// Full wrapper record
    pub fn wrapper(&self, asset_id: AssetId) -> Option<&WrapperRecord> {
        self.wrappers.get(&asset_id)
    }

    fn derive_address(&self, asset_id: AssetId, publisher: &Address) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(self.contract.as_str().as_bytes());
        hasher.update(asset_id.to_be_bytes());
        hasher.update(publisher.as_str().as_bytes());
        let digest = hasher.finalize();
        Address::new(format!("0x{}", hex::encode(&digest[..20])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (WrapperRegistry, Address) {
        let owner = Address::new("0xowner");
        (WrapperRegistry::new("FundCertProvider", owner.clone()), owner)
    }

    #[test]
    fn test_create_wrapper_after_set_creator() {
        let (mut registry, owner) = registry();
        let ledger = ContractId::new("FundCertificate");
        let publisher = Address::new("0xpublisher1");

        registry.set_creator(&owner, ledger.clone()).unwrap();
        let address = registry.create_wrapper(&ledger, 0, &publisher, 20).unwrap();

        assert!(address.as_str().starts_with("0x"));
        assert_eq!(address.as_str().len(), 42);
        assert_eq!(registry.wrapper_address(0), Some(&address));
        assert_eq!(registry.wrapper(0).unwrap().supply, 20);
    }

    #[test]
    fn test_addresses_are_deterministic_and_distinct() {
        let (mut registry, owner) = registry();
        let ledger = ContractId::new("FundCertificate");
        let publisher = Address::new("0xpublisher1");
        registry.set_creator(&owner, ledger.clone()).unwrap();

        let first = registry.create_wrapper(&ledger, 0, &publisher, 20).unwrap();
        let second = registry.create_wrapper(&ledger, 1, &publisher, 20).unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.derive_address(0, &publisher), first);
    }

    #[test]
    fn test_unauthorized_creator() {
        let (mut registry, owner) = registry();
        let publisher = Address::new("0xpublisher1");

        assert!(registry
            .set_creator(&publisher, ContractId::new("FundCertificate"))
            .is_err());

        registry
            .set_creator(&owner, ContractId::new("FundCertificate"))
            .unwrap();
        let err = registry
            .create_wrapper(&ContractId::new("Other"), 0, &publisher, 1)
            .unwrap_err();
        assert!(err.is_authorization());
        assert!(registry.wrapper_address(0).is_none());
    }

    #[test]
    fn test_duplicate_wrapper_rejected() {
        let (mut registry, owner) = registry();
        let ledger = ContractId::new("FundCertificate");
        let publisher = Address::new("0xpublisher1");
        registry.set_creator(&owner, ledger.clone()).unwrap();

        registry.create_wrapper(&ledger, 0, &publisher, 1).unwrap();
        assert!(registry.create_wrapper(&ledger, 0, &publisher, 1).is_err());
    }
}
