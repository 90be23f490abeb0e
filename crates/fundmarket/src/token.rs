//! Fungible payment token (BUSD-like)
//!
//! Balance ledger with owner-controlled minting and ERC-20 style allowances.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MarketError, Result};
use crate::types::{Address, Amount, ContractId};

/// Payment token ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentToken {
    /// Contract name
    pub contract: ContractId,
    /// Ticker symbol
    pub symbol: String,
    /// Display decimals
    pub decimals: u8,
    /// Account allowed to mint
    pub owner: Address,
    /// Anyone may mint (test networks)
    pub open_faucet: bool,
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

impl PaymentToken {
    /// Create an empty token ledger
    pub fn new(
        contract: impl Into<ContractId>,
        symbol: impl Into<String>,
        decimals: u8,
        owner: Address,
    ) -> Self {
        Self {
            contract: contract.into(),
            symbol: symbol.into(),
            decimals,
            owner,
            open_faucet: false,
            total_supply: 0,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
        }
    }

    /// Allow any caller to mint
    pub fn with_open_faucet(mut self, open_faucet: bool) -> Self {
        self.open_faucet = open_faucet;
        self
    }

    /// Total minted supply
    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Balance of an account
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Remaining allowance `owner` granted to `spender`
    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }

    /// Mint new tokens to `to`
    pub fn mint(&mut self, caller: &Address, to: &Address, amount: Amount) -> Result<()> {
        if !self.open_faucet && caller != &self.owner {
            return Err(MarketError::unauthorized(caller, "mint"));
        }
        if amount == 0 {
            return Err(MarketError::InvalidAmount("mint amount must be positive".into()));
        }
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(MarketError::Overflow)?;
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(MarketError::Overflow)?;

        self.total_supply = total_supply;
        self.balances.insert(to.clone(), balance);
        Ok(())
    }

    /// Set the allowance of `spender` over `owner`'s tokens
    pub fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        let spenders = self.allowances.entry(owner.clone()).or_default();
        if amount == 0 {
            spenders.remove(spender);
        } else {
            spenders.insert(spender.clone(), amount);
        }
    }

    /// Move tokens owned by the caller
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<()> {
        self.check_balance(from, amount)?;
        self.move_balance(from, to, amount)
    }

    /// Move tokens on behalf of `from`, consuming `spender`'s allowance
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<()> {
        self.check_allowance(from, spender, amount)?;
        self.check_balance(from, amount)?;

        let remaining = self.allowance(from, spender) - amount;
        self.move_balance(from, to, amount)?;
        self.approve(from, spender, remaining);
        Ok(())
    }

    /// Fail unless `account` holds at least `required`
    pub fn check_balance(&self, account: &Address, required: Amount) -> Result<()> {
        let available = self.balance_of(account);
        if available < required {
            return Err(MarketError::InsufficientBalance {
                account: account.clone(),
                available,
                required,
            });
        }
        Ok(())
    }

    /// Fail unless `spender` may move at least `required` of `owner`'s tokens
    pub fn check_allowance(&self, owner: &Address, spender: &Address, required: Amount) -> Result<()> {
        let available = self.allowance(owner, spender);
        if available < required {
            return Err(MarketError::InsufficientAllowance {
                owner: owner.clone(),
                spender: spender.clone(),
                available,
                required,
            });
        }
        Ok(())
    }

    fn move_balance(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<()> {
        if from == to || amount == 0 {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(MarketError::Overflow)?;
        let debited = self.balance_of(from) - amount;

        if debited == 0 {
            self.balances.remove(from);
        } else {
            self.balances.insert(from.clone(), debited);
        }
        self.balances.insert(to.clone(), credited);
        Ok(())
    }
}
