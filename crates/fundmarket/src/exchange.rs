//! Atomic facade over the payment token, asset ledgers and marketplace
//!
//! Every mutating call validates everything it needs first and only then
//! applies its changes, so a failed call leaves no trace. Successful calls
//! are appended to the [`Journal`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::asset::{AssetLedger, IssueTerms};
use crate::error::{MarketError, Result};
use crate::journal::{Event, Journal};
use crate::marketplace::{Marketplace, Purchase};
use crate::provider::WrapperRegistry;
use crate::token::PaymentToken;
use crate::types::{Address, Amount, AssetId, ContractId, ListingId, Lot, Settlement};

/// Deployed contracts and their shared journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    token: PaymentToken,
    ledgers: BTreeMap<ContractId, AssetLedger>,
    provider: Option<WrapperRegistry>,
    market: Marketplace,
    journal: Journal,
}

impl Exchange {
    /// Create an exchange with no asset ledgers
    pub fn new(token: PaymentToken, market: Marketplace) -> Self {
        Self {
            token,
            ledgers: BTreeMap::new(),
            provider: None,
            market,
            journal: Journal::new(),
        }
    }

    /// Attach the wrapper registry
    pub fn with_provider(mut self, provider: WrapperRegistry) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Attach an asset ledger
    pub fn with_ledger(mut self, ledger: AssetLedger) -> Self {
        self.ledgers.insert(ledger.contract.clone(), ledger);
        self
    }

    pub fn token(&self) -> &PaymentToken {
        &self.token
    }

    pub fn market(&self) -> &Marketplace {
        &self.market
    }

    pub fn provider(&self) -> Option<&WrapperRegistry> {
        self.provider.as_ref()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Escrow and fee account of the marketplace
    pub fn marketplace_account(&self) -> &Address {
        &self.market.account
    }

    pub fn ledger(&self, contract: &ContractId) -> Result<&AssetLedger> {
        self.ledgers
            .get(contract)
            .ok_or_else(|| MarketError::ContractNotFound(contract.clone()))
    }

    pub fn ledgers(&self) -> impl Iterator<Item = &AssetLedger> {
        self.ledgers.values()
    }

    fn ledger_mut(&mut self, contract: &ContractId) -> Result<&mut AssetLedger> {
        self.ledgers
            .get_mut(contract)
            .ok_or_else(|| MarketError::ContractNotFound(contract.clone()))
    }

    // -------------------------------------------------------------------
    // Payment token
    // -------------------------------------------------------------------

    pub fn mint(&mut self, caller: &Address, to: &Address, amount: Amount) -> Result<()> {
        self.token
            .mint(caller, to, amount)
            .inspect_err(|err| warn!(%caller, %to, %err, "mint rejected"))?;
        info!(%to, amount = %amount, "minted payment tokens");
        self.journal.append(Event::Minted {
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    pub fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        self.token.approve(owner, spender, amount);
        debug!(%owner, %spender, amount = %amount, "allowance set");
        self.journal.append(Event::Approval {
            owner: owner.clone(),
            spender: spender.clone(),
            amount,
        });
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<()> {
        self.token
            .transfer(from, to, amount)
            .inspect_err(|err| warn!(%from, %to, %err, "transfer rejected"))?;
        self.journal.append(Event::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.token.balance_of(account)
    }

    // -------------------------------------------------------------------
    // Asset ledgers and wrapper registry
    // -------------------------------------------------------------------

    /// Authorize `creator` to create wrappers on the registry
    pub fn set_creator(&mut self, caller: &Address, creator: &ContractId) -> Result<()> {
        self.ledger(creator)?;
        let provider = self
            .provider
            .as_mut()
            .ok_or_else(|| MarketError::ContractNotFound(ContractId::new("provider")))?;
        provider.set_creator(caller, creator.clone())?;
        info!(%creator, "wrapper creator set");
        Ok(())
    }

    /// Issue a new asset on `contract`, registering its wrapper when the
    /// ledger is linked to the registry
    pub fn issue(
        &mut self,
        caller: &Address,
        contract: &ContractId,
        publisher: &Address,
        terms: IssueTerms,
    ) -> Result<AssetId> {
        let ledger = self.ledger(contract)?;
        let next_id = ledger.next_asset_id();
        if let Some(provider_name) = &ledger.provider {
            let provider = self
                .provider
                .as_ref()
                .filter(|provider| &provider.contract == provider_name)
                .ok_or_else(|| MarketError::ContractNotFound(provider_name.clone()))?;
            provider.check_create(contract, next_id)?;
        }

        let ledger = self.ledger_mut(contract)?;
        let asset_id = ledger
            .issue(caller, publisher, terms)
            .inspect_err(|err| warn!(%caller, %contract, %err, "issue rejected"))?;
        let linked = ledger.provider.is_some();
        info!(%contract, asset_id, %publisher, supply = %terms.supply, "asset issued");
        self.journal.append(Event::AssetIssued {
            contract: contract.clone(),
            asset_id,
            publisher: publisher.clone(),
            supply: terms.supply,
        });

        if linked {
            if let Some(provider) = self.provider.as_mut() {
                let address = provider.create_wrapper(contract, asset_id, publisher, terms.supply)?;
                debug!(asset_id, %address, "wrapper created");
                self.journal.append(Event::WrapperCreated { asset_id, address });
            }
        }
        Ok(asset_id)
    }

    /// Wrapper address registered for an asset id (`getContractAddress`)
    pub fn wrapper_address(&self, asset_id: AssetId) -> Option<&Address> {
        self.provider
            .as_ref()
            .and_then(|provider| provider.wrapper_address(asset_id))
    }

    pub fn set_approval_for_all(
        &mut self,
        contract: &ContractId,
        owner: &Address,
        operator: &Address,
        approved: bool,
    ) -> Result<()> {
        self.ledger_mut(contract)?
            .set_approval_for_all(owner, operator, approved);
        debug!(%contract, %owner, %operator, approved, "operator approval set");
        self.journal.append(Event::OperatorApproval {
            contract: contract.clone(),
            owner: owner.clone(),
            operator: operator.clone(),
            approved,
        });
        Ok(())
    }

    pub fn safe_transfer_from(
        &mut self,
        contract: &ContractId,
        operator: &Address,
        from: &Address,
        to: &Address,
        asset_id: AssetId,
        amount: Amount,
    ) -> Result<()> {
        self.validate_safe_transfer(contract, operator, from, asset_id, amount)
            .and_then(|()| {
                self.ledger_mut(contract)?
                    .safe_transfer_from(operator, from, to, asset_id, amount)
            })
            .inspect_err(|err| warn!(%contract, %operator, %from, %err, "asset transfer rejected"))?;
        self.journal.append(Event::AssetTransfer {
            contract: contract.clone(),
            asset_id,
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    fn validate_safe_transfer(
        &self,
        contract: &ContractId,
        operator: &Address,
        from: &Address,
        asset_id: AssetId,
        amount: Amount,
    ) -> Result<()> {
        self.ledger(contract)?.check_operator(from, operator)?;
        self.check_unescrowed(contract, from, asset_id, amount)
    }

    /// Fail unless `account` can release `amount` units of `asset_id`
    /// without touching units escrowed for open listings
    fn check_unescrowed(
        &self,
        contract: &ContractId,
        account: &Address,
        asset_id: AssetId,
        amount: Amount,
    ) -> Result<()> {
        let ledger = self.ledger(contract)?;
        ledger.check_holding(account, asset_id, amount)?;
        if account != &self.market.account {
            return Ok(());
        }

        let available = ledger
            .balance_of(account, asset_id)
            .saturating_sub(self.market.escrowed(contract, asset_id));
        if available < amount {
            return Err(MarketError::InsufficientAsset {
                account: account.clone(),
                asset_id,
                available,
                required: amount,
            });
        }
        Ok(())
    }

    /// Units of `asset_id` held by `account` on `contract`
    pub fn asset_balance(&self, contract: &ContractId, account: &Address, asset_id: AssetId) -> Result<Amount> {
        Ok(self.ledger(contract)?.balance_of(account, asset_id))
    }

    /// Non-zero holdings of `account` on `contract` (`getMyAsset`)
    pub fn get_my_asset(&self, contract: &ContractId, account: &Address) -> Result<Vec<(AssetId, Amount)>> {
        Ok(self.ledger(contract)?.get_my_asset(account))
    }

    // -------------------------------------------------------------------
    // Marketplace
    // -------------------------------------------------------------------

    pub fn add_publisher(&mut self, caller: &Address, publisher: &Address) -> Result<()> {
        let added = self
            .market
            .add_publisher(caller, publisher)
            .inspect_err(|err| warn!(%caller, %publisher, %err, "add publisher rejected"))?;
        if added {
            info!(%publisher, "publisher added");
            self.journal.append(Event::PublisherAdded {
                publisher: publisher.clone(),
            });
        }
        Ok(())
    }

    pub fn remove_publisher(&mut self, caller: &Address, publisher: &Address) -> Result<()> {
        let removed = self
            .market
            .remove_publisher(caller, publisher)
            .inspect_err(|err| warn!(%caller, %publisher, %err, "remove publisher rejected"))?;
        if removed {
            info!(%publisher, "publisher removed");
            self.journal.append(Event::PublisherRemoved {
                publisher: publisher.clone(),
            });
        }
        Ok(())
    }

    /// Escrow `quantity` units and open a listing at `unit_price`
    pub fn sell_item(
        &mut self,
        caller: &Address,
        contract: &ContractId,
        asset_id: AssetId,
        quantity: Amount,
        unit_price: Amount,
    ) -> Result<ListingId> {
        self.validate_sell_item(caller, contract, asset_id, quantity)
            .inspect_err(|err| warn!(%caller, %contract, asset_id, %err, "sell item rejected"))?;

        let escrow = self.market.account.clone();
        self.ledger_mut(contract)?
            .safe_transfer_from(&escrow, caller, &escrow, asset_id, quantity)?;
        let listing_id = self
            .market
            .open_listing(caller, contract, asset_id, quantity, unit_price);

        info!(listing_id, %caller, %contract, asset_id, quantity = %quantity, unit_price = %unit_price, "listing created");
        self.journal.append(Event::ListingCreated {
            listing_id,
            publisher: caller.clone(),
            contract: contract.clone(),
            asset_id,
            quantity,
            unit_price,
        });
        Ok(listing_id)
    }

    fn validate_sell_item(
        &self,
        caller: &Address,
        contract: &ContractId,
        asset_id: AssetId,
        quantity: Amount,
    ) -> Result<()> {
        self.market.check_publisher(caller)?;
        if quantity == 0 {
            return Err(MarketError::InvalidAmount("listing quantity must be positive".into()));
        }
        let ledger = self.ledger(contract)?;
        ledger.check_holding(caller, asset_id, quantity)?;
        ledger.check_operator(caller, &self.market.account)
    }

    /// Buy every lot or none of them
    pub fn buy_item(&mut self, caller: &Address, lots: &[Lot]) -> Result<Vec<Purchase>> {
        let purchases = self
            .validate_buy_item(caller, lots)
            .inspect_err(|err| warn!(%caller, lots = lots.len(), %err, "buy item rejected"))?;

        let escrow = self.market.account.clone();
        for purchase in &purchases {
            let settlement = purchase.settlement;
            self.token
                .transfer_from(&escrow, caller, &purchase.publisher, settlement.net)?;
            if settlement.fee > 0 {
                self.token.transfer_from(&escrow, caller, &escrow, settlement.fee)?;
            }
            self.ledger_mut(&purchase.contract)?.safe_transfer_from(
                &escrow,
                &escrow,
                caller,
                purchase.asset_id,
                purchase.quantity,
            )?;
            self.market.fill(purchase.listing_id, purchase.quantity)?;

            info!(
                listing_id = purchase.listing_id,
                buyer = %caller,
                quantity = %purchase.quantity,
                gross = %settlement.gross,
                "item bought"
            );
            self.journal.append(Event::ItemBought {
                listing_id: purchase.listing_id,
                buyer: caller.clone(),
                quantity: purchase.quantity,
                settlement,
            });
        }
        Ok(purchases)
    }

    fn validate_buy_item(&self, caller: &Address, lots: &[Lot]) -> Result<Vec<Purchase>> {
        let purchases = self.market.plan_purchase(caller, lots)?;
        let total = purchases.iter().try_fold(0 as Amount, |total, purchase| {
            total
                .checked_add(purchase.settlement.gross)
                .ok_or(MarketError::Overflow)
        })?;

        self.token.check_balance(caller, total)?;
        self.token
            .check_allowance(caller, &self.market.account, total)?;

        let mut released: BTreeMap<(&ContractId, AssetId), Amount> = BTreeMap::new();
        for purchase in &purchases {
            let units = released
                .entry((&purchase.contract, purchase.asset_id))
                .or_insert(0);
            *units = units
                .checked_add(purchase.quantity)
                .ok_or(MarketError::Overflow)?;
        }
        for ((contract, asset_id), units) in released {
            self.ledger(contract)?
                .check_holding(&self.market.account, asset_id, units)?;
        }
        Ok(purchases)
    }

    /// Close an open listing and return its remaining escrow
    pub fn cancel_listing(&mut self, caller: &Address, listing_id: ListingId) -> Result<Amount> {
        let listing = self
            .market
            .check_cancel(caller, listing_id)
            .inspect_err(|err| warn!(%caller, listing_id, %err, "cancel listing rejected"))?
            .clone();

        let escrow = self.market.account.clone();
        if listing.remaining > 0 {
            self.ledger_mut(&listing.contract)?.safe_transfer_from(
                &escrow,
                &escrow,
                &listing.publisher,
                listing.asset_id,
                listing.remaining,
            )?;
        }
        let returned = self.market.mark_cancelled(listing_id)?;

        info!(listing_id, returned = %returned, "listing cancelled");
        self.journal.append(Event::ListingCancelled {
            listing_id,
            returned,
        });
        Ok(returned)
    }

    /// Sell held units back to the marketplace reserve at the asset's
    /// issue price
    pub fn sell_now(
        &mut self,
        caller: &Address,
        contract: &ContractId,
        asset_id: AssetId,
        quantity: Amount,
    ) -> Result<Settlement> {
        let settlement = self
            .validate_sell_now(caller, contract, asset_id, quantity)
            .inspect_err(|err| warn!(%caller, %contract, asset_id, %err, "sell now rejected"))?;

        let reserve = self.market.account.clone();
        self.ledger_mut(contract)?
            .safe_transfer_from(caller, caller, &reserve, asset_id, quantity)?;
        self.token.transfer(&reserve, caller, settlement.gross)?;

        info!(%caller, %contract, asset_id, quantity = %quantity, paid = %settlement.gross, "sold to reserve");
        self.journal.append(Event::SoldNow {
            seller: caller.clone(),
            contract: contract.clone(),
            asset_id,
            quantity,
            settlement,
        });
        Ok(settlement)
    }

    fn validate_sell_now(
        &self,
        caller: &Address,
        contract: &ContractId,
        asset_id: AssetId,
        quantity: Amount,
    ) -> Result<Settlement> {
        if quantity == 0 {
            return Err(MarketError::InvalidAmount("sell quantity must be positive".into()));
        }
        if caller == &self.market.account {
            return Err(MarketError::unauthorized(caller, "sell to its own reserve"));
        }
        let unit_price = self.ledger(contract)?.asset_info(asset_id)?.terms.unit_price;
        self.check_unescrowed(contract, caller, asset_id, quantity)?;

        let gross = quantity
            .checked_mul(unit_price)
            .ok_or(MarketError::Overflow)?;
        self.token.check_balance(&self.market.account, gross)?;
        Ok(Settlement::without_fee(gross))
    }

    /// Units of an asset held in escrow for open listings
    pub fn escrowed(&self, contract: &ContractId, asset_id: AssetId) -> Amount {
        self.market.escrowed(contract, asset_id)
    }
}

/// Exchange shared across threads
///
/// Writers are serialized by the lock, so every call observes either all
/// or none of another call's changes.
#[derive(Debug, Clone)]
pub struct SharedExchange {
    inner: Arc<RwLock<Exchange>>,
}

impl SharedExchange {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            inner: Arc::new(RwLock::new(exchange)),
        }
    }

    /// Run a read-only query
    pub fn read<R>(&self, f: impl FnOnce(&Exchange) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run a mutation while holding the write lock
    pub fn write<R>(&self, f: impl FnOnce(&mut Exchange) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Point-in-time copy of the whole exchange
    pub fn snapshot(&self) -> Exchange {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::ListingStatus;
    use pretty_assertions::assert_eq;

    struct Accounts {
        owner: Address,
        publisher: Address,
        buyer: Address,
        escrow: Address,
    }

    fn certificate() -> ContractId {
        ContractId::new("FundCertificate")
    }

    fn terms(supply: Amount, unit_price: Amount) -> IssueTerms {
        IssueTerms {
            issue_date: 1_680_681_300,
            supply,
            interest_term_days: 92,
            unit_price,
        }
    }

    fn setup() -> (Exchange, Accounts) {
        let accounts = Accounts {
            owner: Address::new("0xowner"),
            publisher: Address::new("0xpublisher1"),
            buyer: Address::new("0xbuyer"),
            escrow: Address::new("marketplace"),
        };
        let token = PaymentToken::new("BUSD", "BUSD", 18, accounts.owner.clone());
        let market = Marketplace::new("Marketplace", accounts.owner.clone(), accounts.escrow.clone());
        let mut exchange = Exchange::new(token, market)
            .with_ledger(AssetLedger::new(certificate(), accounts.owner.clone()));

        exchange.add_publisher(&accounts.owner, &accounts.publisher).unwrap();
        exchange
            .issue(&accounts.owner, &certificate(), &accounts.publisher, terms(9_000, 10))
            .unwrap();
        exchange
            .set_approval_for_all(&certificate(), &accounts.publisher, &accounts.escrow, true)
            .unwrap();
        (exchange, accounts)
    }

    #[test]
    fn test_sell_item_escrows_units() {
        let (mut exchange, a) = setup();

        let id = exchange.sell_item(&a.publisher, &certificate(), 0, 3_000, 2).unwrap();
        assert_eq!(id, 0);
        assert_eq!(exchange.asset_balance(&certificate(), &a.publisher, 0).unwrap(), 6_000);
        assert_eq!(exchange.asset_balance(&certificate(), &a.escrow, 0).unwrap(), 3_000);
        assert_eq!(exchange.escrowed(&certificate(), 0), 3_000);
    }

    #[test]
    fn test_sell_item_requires_publisher_and_approval() {
        let (mut exchange, a) = setup();

        let err = exchange.sell_item(&a.buyer, &certificate(), 0, 1, 1).unwrap_err();
        assert_eq!(err, MarketError::NotPublisher(a.buyer.clone()));

        exchange
            .set_approval_for_all(&certificate(), &a.publisher, &a.escrow, false)
            .unwrap();
        let err = exchange.sell_item(&a.publisher, &certificate(), 0, 1, 1).unwrap_err();
        assert!(matches!(err, MarketError::NotApproved { .. }));

        assert_eq!(exchange.market().listings().count(), 0);
        assert_eq!(exchange.asset_balance(&certificate(), &a.publisher, 0).unwrap(), 9_000);
    }

    #[test]
    fn test_sell_item_insufficient_holding() {
        let (mut exchange, a) = setup();
        let err = exchange.sell_item(&a.publisher, &certificate(), 0, 9_001, 1).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientAsset { available: 9_000, .. }));
    }

    #[test]
    fn test_buy_item_settles_payment_and_assets() {
        let (mut exchange, a) = setup();
        exchange.sell_item(&a.publisher, &certificate(), 0, 3_000, 2).unwrap();
        exchange.mint(&a.owner, &a.buyer, 10_000).unwrap();
        exchange.approve(&a.buyer, &a.escrow, 10_000);

        let purchases = exchange.buy_item(&a.buyer, &[Lot::new(0, 1_000)]).unwrap();
        assert_eq!(purchases.len(), 1);
        assert_eq!(purchases[0].settlement.gross, 2_000);

        assert_eq!(exchange.balance_of(&a.buyer), 8_000);
        assert_eq!(exchange.balance_of(&a.publisher), 2_000);
        assert_eq!(exchange.token().allowance(&a.buyer, &a.escrow), 8_000);
        assert_eq!(exchange.asset_balance(&certificate(), &a.buyer, 0).unwrap(), 1_000);
        assert_eq!(exchange.market().listing(0).unwrap().remaining, 2_000);
    }

    #[test]
    fn test_buy_item_is_all_or_nothing() {
        let (mut exchange, a) = setup();
        exchange.sell_item(&a.publisher, &certificate(), 0, 3_000, 1).unwrap();
        exchange.sell_item(&a.publisher, &certificate(), 0, 100, 1).unwrap();
        exchange.mint(&a.owner, &a.buyer, 10_000).unwrap();
        exchange.approve(&a.buyer, &a.escrow, 10_000);
        let before = exchange.journal().len();

        let err = exchange
            .buy_item(&a.buyer, &[Lot::new(0, 1_000), Lot::new(1, 101)])
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientListing { listing_id: 1, .. }));

        assert_eq!(exchange.balance_of(&a.buyer), 10_000);
        assert_eq!(exchange.asset_balance(&certificate(), &a.buyer, 0).unwrap(), 0);
        assert_eq!(exchange.market().listing(0).unwrap().remaining, 3_000);
        assert_eq!(exchange.journal().len(), before);
    }

    #[test]
    fn test_buy_item_requires_allowance() {
        let (mut exchange, a) = setup();
        exchange.sell_item(&a.publisher, &certificate(), 0, 10, 5).unwrap();
        exchange.mint(&a.owner, &a.buyer, 1_000).unwrap();
        exchange.approve(&a.buyer, &a.escrow, 49);

        let err = exchange.buy_item(&a.buyer, &[Lot::new(0, 10)]).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientAllowance { available: 49, required: 50, .. }));

        exchange.approve(&a.buyer, &a.escrow, 50);
        exchange.buy_item(&a.buyer, &[Lot::new(0, 10)]).unwrap();
        assert_eq!(exchange.market().listing(0).unwrap().status, ListingStatus::SoldOut);
    }

    #[test]
    fn test_buy_item_requires_balance() {
        let (mut exchange, a) = setup();
        exchange.sell_item(&a.publisher, &certificate(), 0, 10, 5).unwrap();
        exchange.approve(&a.buyer, &a.escrow, 1_000);

        let err = exchange.buy_item(&a.buyer, &[Lot::new(0, 1)]).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientBalance { available: 0, required: 5, .. }));
    }

    #[test]
    fn test_buy_item_charges_fee() {
        let (exchange, a) = setup();
        let mut exchange = Exchange {
            market: exchange.market.clone().with_fee_bps(250),
            ..exchange
        };
        exchange.sell_item(&a.publisher, &certificate(), 0, 100, 100).unwrap();
        exchange.mint(&a.owner, &a.buyer, 10_000).unwrap();
        exchange.approve(&a.buyer, &a.escrow, 10_000);

        exchange.buy_item(&a.buyer, &[Lot::new(0, 100)]).unwrap();
        assert_eq!(exchange.balance_of(&a.publisher), 9_750);
        assert_eq!(exchange.balance_of(&a.escrow), 250);
        assert_eq!(exchange.balance_of(&a.buyer), 0);
    }

    #[test]
    fn test_cancel_listing_returns_escrow() {
        let (mut exchange, a) = setup();
        exchange.sell_item(&a.publisher, &certificate(), 0, 3_000, 1).unwrap();
        exchange.mint(&a.owner, &a.buyer, 1_000).unwrap();
        exchange.approve(&a.buyer, &a.escrow, 1_000);
        exchange.buy_item(&a.buyer, &[Lot::new(0, 1_000)]).unwrap();

        let returned = exchange.cancel_listing(&a.publisher, 0).unwrap();
        assert_eq!(returned, 2_000);
        assert_eq!(exchange.asset_balance(&certificate(), &a.publisher, 0).unwrap(), 8_000);
        assert_eq!(exchange.asset_balance(&certificate(), &a.escrow, 0).unwrap(), 0);
        assert_eq!(exchange.escrowed(&certificate(), 0), 0);
        assert_eq!(exchange.market().listing(0).unwrap().sold(), 1_000);

        let err = exchange.buy_item(&a.buyer, &[Lot::new(0, 1)]).unwrap_err();
        assert_eq!(err, MarketError::ListingClosed(0));
    }

    #[test]
    fn test_sell_now_pays_from_reserve() {
        let (mut exchange, a) = setup();

        let err = exchange.sell_now(&a.publisher, &certificate(), 0, 100).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientBalance { required: 1_000, .. }));

        exchange.mint(&a.owner, &a.escrow, 5_000).unwrap();
        let settlement = exchange.sell_now(&a.publisher, &certificate(), 0, 100).unwrap();
        assert_eq!(settlement.gross, 1_000);
        assert_eq!(exchange.balance_of(&a.publisher), 1_000);
        assert_eq!(exchange.balance_of(&a.escrow), 4_000);
        assert_eq!(exchange.asset_balance(&certificate(), &a.escrow, 0).unwrap(), 100);
        assert_eq!(exchange.escrowed(&certificate(), 0), 0);
    }

    #[test]
    fn test_sell_now_rejections_change_nothing() {
        let (mut exchange, a) = setup();
        exchange.mint(&a.owner, &a.escrow, 1_000_000).unwrap();
        let journal = exchange.journal().len();

        let err = exchange.sell_now(&a.publisher, &certificate(), 0, 0).unwrap_err();
        assert!(matches!(err, MarketError::InvalidAmount(_)));

        let err = exchange.sell_now(&a.publisher, &certificate(), 7, 1).unwrap_err();
        assert!(err.is_not_found());

        let err = exchange.sell_now(&a.publisher, &certificate(), 0, 9_001).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientAsset { available: 9_000, required: 9_001, .. }));

        let err = exchange.sell_now(&a.escrow, &certificate(), 0, 1).unwrap_err();
        assert!(err.is_authorization());

        assert_eq!(exchange.asset_balance(&certificate(), &a.publisher, 0).unwrap(), 9_000);
        assert_eq!(exchange.asset_balance(&certificate(), &a.escrow, 0).unwrap(), 0);
        assert_eq!(exchange.balance_of(&a.publisher), 0);
        assert_eq!(exchange.balance_of(&a.escrow), 1_000_000);
        assert_eq!(exchange.journal().len(), journal);
    }

    #[test]
    fn test_escrowed_units_cannot_leave_marketplace_account() {
        let (mut exchange, a) = setup();
        let elsewhere = Address::new("0xelsewhere");
        exchange.sell_item(&a.publisher, &certificate(), 0, 3_000, 1).unwrap();
        exchange.sell_item(&a.publisher, &certificate(), 0, 3_000, 1).unwrap();

        let err = exchange
            .safe_transfer_from(&certificate(), &a.escrow, &a.escrow, &elsewhere, 0, 5_000)
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientAsset { available: 0, required: 5_000, .. }));
        assert_eq!(exchange.asset_balance(&certificate(), &a.escrow, 0).unwrap(), 6_000);

        // Units bought back through sell_now are free to move
        exchange.mint(&a.owner, &a.escrow, 1_000).unwrap();
        exchange.sell_now(&a.publisher, &certificate(), 0, 100).unwrap();
        let err = exchange
            .safe_transfer_from(&certificate(), &a.escrow, &a.escrow, &elsewhere, 0, 101)
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientAsset { available: 100, .. }));
        exchange
            .safe_transfer_from(&certificate(), &a.escrow, &a.escrow, &elsewhere, 0, 100)
            .unwrap();
        assert_eq!(exchange.escrowed(&certificate(), 0), 6_000);

        exchange.mint(&a.owner, &a.buyer, 2_000).unwrap();
        exchange.approve(&a.buyer, &a.escrow, 2_000);
        exchange
            .buy_item(&a.buyer, &[Lot::new(0, 1_000), Lot::new(1, 1_000)])
            .unwrap();
        assert_eq!(exchange.asset_balance(&certificate(), &a.buyer, 0).unwrap(), 2_000);
    }

    #[test]
    fn test_buy_item_checks_escrow_holding_before_settling() {
        let (mut exchange, a) = setup();
        exchange.sell_item(&a.publisher, &certificate(), 0, 3_000, 1).unwrap();
        exchange.sell_item(&a.publisher, &certificate(), 0, 3_000, 1).unwrap();
        exchange.mint(&a.owner, &a.buyer, 10_000).unwrap();
        exchange.approve(&a.buyer, &a.escrow, 10_000);

        // Short the escrow behind the facade's back
        exchange
            .ledgers
            .get_mut(&certificate())
            .unwrap()
            .safe_transfer_from(&a.escrow, &a.escrow, &Address::new("0xelsewhere"), 0, 5_000)
            .unwrap();
        let journal = exchange.journal().len();

        let err = exchange
            .buy_item(&a.buyer, &[Lot::new(0, 1_000), Lot::new(1, 1_000)])
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientAsset { available: 1_000, required: 2_000, .. }));

        assert_eq!(exchange.balance_of(&a.buyer), 10_000);
        assert_eq!(exchange.balance_of(&a.publisher), 0);
        assert_eq!(exchange.token().allowance(&a.buyer, &a.escrow), 10_000);
        assert_eq!(exchange.asset_balance(&certificate(), &a.buyer, 0).unwrap(), 0);
        assert_eq!(exchange.market().listing(0).unwrap().remaining, 3_000);
        assert_eq!(exchange.market().listing(1).unwrap().remaining, 3_000);
        assert_eq!(exchange.journal().len(), journal);
    }

    #[test]
    fn test_issue_with_provider_registers_wrapper() {
        let owner = Address::new("0xowner");
        let publisher = Address::new("0xpublisher1");
        let token = PaymentToken::new("BUSD", "BUSD", 18, owner.clone());
        let market = Marketplace::new("Marketplace", owner.clone(), Address::new("marketplace"));
        let mut exchange = Exchange::new(token, market)
            .with_provider(WrapperRegistry::new("FundCertProvider", owner.clone()))
            .with_ledger(
                AssetLedger::new(certificate(), owner.clone())
                    .with_provider(ContractId::new("FundCertProvider")),
            );

        let err = exchange
            .issue(&owner, &certificate(), &publisher, terms(20, 1))
            .unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(exchange.ledger(&certificate()).unwrap().next_asset_id(), 0);

        exchange.set_creator(&owner, &certificate()).unwrap();
        let id = exchange
            .issue(&owner, &certificate(), &publisher, terms(20, 1))
            .unwrap();
        assert!(exchange.wrapper_address(id).is_some());
        assert_eq!(exchange.asset_balance(&certificate(), &publisher, id).unwrap(), 20);
        assert_eq!(exchange.asset_balance(&certificate(), &owner, id).unwrap(), 0);
    }

    #[test]
    fn test_journal_records_successful_calls_only() {
        let (mut exchange, a) = setup();
        let before = exchange.journal().len();

        assert!(exchange.add_publisher(&a.buyer, &a.buyer).is_err());
        assert_eq!(exchange.journal().len(), before);

        exchange.sell_item(&a.publisher, &certificate(), 0, 10, 1).unwrap();
        assert_eq!(exchange.journal().len(), before + 1);
        assert!(exchange.journal().verify().is_ok());
    }

    #[test]
    fn test_shared_exchange_serializes_writers() {
        let (exchange, a) = setup();
        let shared = SharedExchange::new(exchange);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                let publisher = a.publisher.clone();
                std::thread::spawn(move || {
                    shared.write(|exchange| {
                        exchange.sell_item(&publisher, &certificate(), 0, 1_000, 1)
                    })
                })
            })
            .collect();
        let mut ids: Vec<ListingId> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect();
        ids.sort();

        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(shared.read(|exchange| exchange.escrowed(&certificate(), 0)), 4_000);
        assert_eq!(shared.snapshot().market().listings().count(), 4);
    }
}
