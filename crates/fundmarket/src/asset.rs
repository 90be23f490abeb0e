//! Multi-id asset ledger (fund certificates and wrapped ETF units)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MarketError, Result};
use crate::types::{Address, Amount, AssetId, ContractId};

/// Terms recorded when a fund certificate is issued
///
/// Stored for reference only; no interest is accrued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTerms {
    /// Issue date (unix seconds)
    pub issue_date: i64,
    /// Units created for the publisher
    pub supply: Amount,
    /// Interest term in days
    pub interest_term_days: u32,
    /// Face price per unit, in payment token base units
    pub unit_price: Amount,
}

/// Issued asset metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: AssetId,
    pub publisher: Address,
    pub terms: IssueTerms,
}

/// Asset ledger keyed by `(account, asset id)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetLedger {
    /// Contract name
    pub contract: ContractId,
    /// Account allowed to issue
    pub owner: Address,
    /// Wrapper registry this ledger issues through, if any
    pub provider: Option<ContractId>,
    next_id: AssetId,
    assets: BTreeMap<AssetId, AssetInfo>,
    balances: BTreeMap<AssetId, BTreeMap<Address, Amount>>,
    operators: BTreeMap<Address, BTreeSet<Address>>,
}

impl AssetLedger {
    /// Create an empty ledger
    pub fn new(contract: impl Into<ContractId>, owner: Address) -> Self {
        Self {
            contract: contract.into(),
            owner,
            provider: None,
            next_id: 0,
            assets: BTreeMap::new(),
            balances: BTreeMap::new(),
            operators: BTreeMap::new(),
        }
    }

    /// Link a wrapper registry
    pub fn with_provider(mut self, provider: ContractId) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Id the next `issue` will assign
    pub fn next_asset_id(&self) -> AssetId {
        self.next_id
    }

    /// Issue a new asset id and credit its supply to `publisher`
    pub fn issue(&mut self, caller: &Address, publisher: &Address, terms: IssueTerms) -> Result<AssetId> {
        if caller != &self.owner {
            return Err(MarketError::unauthorized(caller, format!("issue on {}", self.contract)));
        }
        if terms.supply == 0 {
            return Err(MarketError::InvalidAmount("issued supply must be positive".into()));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.assets.insert(
            id,
            AssetInfo {
                id,
                publisher: publisher.clone(),
                terms,
            },
        );
        self.balances
            .entry(id)
            .or_default()
            .insert(publisher.clone(), terms.supply);
        Ok(id)
    }

    /// Metadata of an issued asset
    pub fn asset_info(&self, id: AssetId) -> Result<&AssetInfo> {
        self.assets.get(&id).ok_or_else(|| MarketError::AssetNotFound {
            contract: self.contract.clone(),
            asset_id: id,
        })
    }

    /// All issued assets in id order
    pub fn assets(&self) -> impl Iterator<Item = &AssetInfo> {
        self.assets.values()
    }

    /// Units of `id` held by `account`
    pub fn balance_of(&self, account: &Address, id: AssetId) -> Amount {
        self.balances
            .get(&id)
            .and_then(|holders| holders.get(account))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all holdings of `id`
    pub fn total_supply(&self, id: AssetId) -> Amount {
        self.balances
            .get(&id)
            .map(|holders| holders.values().sum())
            .unwrap_or(0)
    }

    /// Every asset the account holds with a non-zero balance
    pub fn get_my_asset(&self, account: &Address) -> Vec<(AssetId, Amount)> {
        self.balances
            .iter()
            .filter_map(|(id, holders)| holders.get(account).map(|amount| (*id, *amount)))
            .filter(|(_, amount)| *amount > 0)
            .collect()
    }

    /// Grant or revoke `operator` control over all of `owner`'s assets
    pub fn set_approval_for_all(&mut self, owner: &Address, operator: &Address, approved: bool) {
        if approved {
            self.operators
                .entry(owner.clone())
                .or_default()
                .insert(operator.clone());
        } else if let Some(ops) = self.operators.get_mut(owner) {
            ops.remove(operator);
            if ops.is_empty() {
                self.operators.remove(owner);
            }
        }
    }

    /// Whether `operator` may move `owner`'s assets
    pub fn is_approved_for_all(&self, owner: &Address, operator: &Address) -> bool {
        self.operators
            .get(owner)
            .is_some_and(|ops| ops.contains(operator))
    }

    /// Fail unless `account` holds at least `required` units of `id`
    pub fn check_holding(&self, account: &Address, id: AssetId, required: Amount) -> Result<()> {
        self.asset_info(id)?;
        let available = self.balance_of(account, id);
        if available < required {
            return Err(MarketError::InsufficientAsset {
                account: account.clone(),
                asset_id: id,
                available,
                required,
            });
        }
        Ok(())
    }

    /// Fail unless `operator` is `owner` or approved for all
    pub fn check_operator(&self, owner: &Address, operator: &Address) -> Result<()> {
        if owner == operator || self.is_approved_for_all(owner, operator) {
            Ok(())
        } else {
            Err(MarketError::NotApproved {
                owner: owner.clone(),
                operator: operator.clone(),
            })
        }
    }

    /// Move `amount` units of `id` from `from` to `to`
    pub fn safe_transfer_from(
        &mut self,
        operator: &Address,
        from: &Address,
        to: &Address,
        id: AssetId,
        amount: Amount,
    ) -> Result<()> {
        if amount == 0 {
            return Err(MarketError::InvalidAmount("transfer amount must be positive".into()));
        }
        self.check_operator(from, operator)?;
        self.check_holding(from, id, amount)?;
        if from == to {
            return Ok(());
        }

        let holders = self.balances.entry(id).or_default();
        let credited = holders
            .get(to)
            .copied()
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or(MarketError::Overflow)?;
        let debited = holders.get(from).copied().unwrap_or(0) - amount;

        if debited == 0 {
            holders.remove(from);
        } else {
            holders.insert(from.clone(), debited);
        }
        holders.insert(to.clone(), credited);
        Ok(())
    }
}
