//! Listing engine and publisher registry
//!
//! The marketplace owns its registries explicitly. Escrowed assets sit on
//! the asset ledgers under the marketplace account; this module only tracks
//! which listing they belong to. Cross-ledger settlement lives in
//! [`crate::exchange`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MarketError, Result};
use crate::types::{Address, Amount, AssetId, ContractId, ListingId, Lot, Settlement};

/// Lifecycle of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    /// Units remain for sale
    Open,
    /// Every unit was bought
    SoldOut,
    /// Withdrawn by its publisher or the admin
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::SoldOut => "sold_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An open offer of one asset id at a fixed unit price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Sequential listing id
    pub id: ListingId,
    /// Asset ledger the units live on
    pub contract: ContractId,
    /// Asset id offered
    pub asset_id: AssetId,
    /// Account paid for every unit bought
    pub publisher: Address,
    /// Price per unit, fixed at listing time
    pub unit_price: Amount,
    /// Units originally offered
    pub quantity: Amount,
    /// Units still for sale
    pub remaining: Amount,
    /// Units handed back to the publisher on cancel
    #[serde(default)]
    pub returned: Amount,
    /// Lifecycle state
    pub status: ListingStatus,
    /// When the listing was opened
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_open(&self) -> bool {
        self.status == ListingStatus::Open
    }

    /// Units already bought
    pub fn sold(&self) -> Amount {
        self.quantity - self.remaining - self.returned
    }
}

/// One settled lot of a purchase batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Listing the units came from
    pub listing_id: ListingId,
    /// Paying account
    pub buyer: Address,
    /// Account credited with the net payment
    pub publisher: Address,
    /// Asset ledger the units move on
    pub contract: ContractId,
    /// Asset id bought
    pub asset_id: AssetId,
    /// Units bought
    pub quantity: Amount,
    /// Payment split for this lot
    pub settlement: Settlement,
}

/// Marketplace state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marketplace {
    pub contract: ContractId,
    /// Account allowed to manage publishers
    pub admin: Address,
    /// Escrow and fee account
    pub account: Address,
    /// Fee on each purchase, in basis points
    pub fee_bps: u32,
    publishers: BTreeSet<Address>,
    listings: BTreeMap<ListingId, Listing>,
    next_listing_id: ListingId,
}

impl Marketplace {
    pub fn new(contract: impl Into<ContractId>, admin: Address, account: Address) -> Self {
        Self {
            contract: contract.into(),
            admin,
            account,
            fee_bps: 0,
            publishers: BTreeSet::new(),
            listings: BTreeMap::new(),
            next_listing_id: 0,
        }
    }

    /// Set the purchase fee
    pub fn with_fee_bps(mut self, fee_bps: u32) -> Self {
        self.fee_bps = fee_bps;
        self
    }

    /// Register `publisher`; returns false if it was already registered
    pub fn add_publisher(&mut self, caller: &Address, publisher: &Address) -> Result<bool> {
        self.check_admin(caller, "add publishers")?;
        Ok(self.publishers.insert(publisher.clone()))
    }

    /// Deregister `publisher`; its open listings stay open
    pub fn remove_publisher(&mut self, caller: &Address, publisher: &Address) -> Result<bool> {
        self.check_admin(caller, "remove publishers")?;
        Ok(self.publishers.remove(publisher))
    }

    pub fn is_publisher(&self, account: &Address) -> bool {
        self.publishers.contains(account)
    }

    pub fn publishers(&self) -> impl Iterator<Item = &Address> {
        self.publishers.iter()
    }

    /// Fail unless `caller` may list assets
    pub fn check_publisher(&self, caller: &Address) -> Result<()> {
        if self.is_publisher(caller) {
            Ok(())
        } else {
            Err(MarketError::NotPublisher(caller.clone()))
        }
    }

    fn check_admin(&self, caller: &Address, action: &str) -> Result<()> {
        if caller == &self.admin {
            Ok(())
        } else {
            Err(MarketError::unauthorized(caller, action))
        }
    }

    /// Id the next listing will receive
    pub fn next_listing_id(&self) -> ListingId {
        self.next_listing_id
    }

    pub fn listing(&self, id: ListingId) -> Result<&Listing> {
        self.listings.get(&id).ok_or(MarketError::ListingNotFound(id))
    }

    /// All listings, including sold out and cancelled ones
    pub fn listings(&self) -> impl Iterator<Item = &Listing> {
        self.listings.values()
    }

    pub fn open_listings(&self) -> impl Iterator<Item = &Listing> {
        self.listings.values().filter(|listing| listing.is_open())
    }

    /// Units of an asset currently held for listings
    pub fn escrowed(&self, contract: &ContractId, asset_id: AssetId) -> Amount {
        self.open_listings()
            .filter(|listing| &listing.contract == contract && listing.asset_id == asset_id)
            .map(|listing| listing.remaining)
            .sum()
    }

    /// Record a listing whose units are already escrowed
    pub(crate) fn open_listing(
        &mut self,
        publisher: &Address,
        contract: &ContractId,
        asset_id: AssetId,
        quantity: Amount,
        unit_price: Amount,
    ) -> ListingId {
        let id = self.next_listing_id;
        self.next_listing_id += 1;
        self.listings.insert(
            id,
            Listing {
                id,
                contract: contract.clone(),
                asset_id,
                publisher: publisher.clone(),
                unit_price,
                quantity,
                remaining: quantity,
                returned: 0,
                status: ListingStatus::Open,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Validate a purchase batch without touching state
    ///
    /// Quantities naming the same listing are summed before the remaining
    /// check, so a batch can never oversell a listing.
    pub fn plan_purchase(&self, buyer: &Address, lots: &[Lot]) -> Result<Vec<Purchase>> {
        if lots.is_empty() {
            return Err(MarketError::InvalidAmount("purchase batch is empty".into()));
        }

        let mut requested: BTreeMap<ListingId, Amount> = BTreeMap::new();
        let mut purchases = Vec::with_capacity(lots.len());

        for lot in lots {
            if lot.quantity == 0 {
                return Err(MarketError::InvalidAmount(format!(
                    "lot for listing {} has zero quantity",
                    lot.listing_id
                )));
            }
            let listing = self.listing(lot.listing_id)?;
            if !listing.is_open() {
                return Err(MarketError::ListingClosed(listing.id));
            }

            let total = requested.entry(listing.id).or_insert(0);
            *total = total.checked_add(lot.quantity).ok_or(MarketError::Overflow)?;
            if *total > listing.remaining {
                return Err(MarketError::InsufficientListing {
                    listing_id: listing.id,
                    remaining: listing.remaining,
                    requested: *total,
                });
            }

            let gross = lot
                .quantity
                .checked_mul(listing.unit_price)
                .ok_or(MarketError::Overflow)?;
            purchases.push(Purchase {
                listing_id: listing.id,
                buyer: buyer.clone(),
                publisher: listing.publisher.clone(),
                contract: listing.contract.clone(),
                asset_id: listing.asset_id,
                quantity: lot.quantity,
                settlement: Settlement::with_fee_bps(gross, self.fee_bps)?,
            });
        }

        Ok(purchases)
    }

    /// Take `quantity` units off a listing validated by [`Self::plan_purchase`]
    pub(crate) fn fill(&mut self, id: ListingId, quantity: Amount) -> Result<()> {
        let listing = self
            .listings
            .get_mut(&id)
            .ok_or(MarketError::ListingNotFound(id))?;
        listing.remaining = listing
            .remaining
            .checked_sub(quantity)
            .ok_or(MarketError::InsufficientListing {
                listing_id: id,
                remaining: listing.remaining,
                requested: quantity,
            })?;
        if listing.remaining == 0 {
            listing.status = ListingStatus::SoldOut;
        }
        Ok(())
    }

    /// Fail unless `caller` may cancel listing `id`
    pub fn check_cancel(&self, caller: &Address, id: ListingId) -> Result<&Listing> {
        let listing = self.listing(id)?;
        if caller != &listing.publisher && caller != &self.admin {
            return Err(MarketError::unauthorized(caller, format!("cancel listing {}", id)));
        }
        if !listing.is_open() {
            return Err(MarketError::ListingClosed(id));
        }
        Ok(listing)
    }

    /// Close a listing after its escrow was returned
    pub(crate) fn mark_cancelled(&mut self, id: ListingId) -> Result<Amount> {
        let listing = self
            .listings
            .get_mut(&id)
            .ok_or(MarketError::ListingNotFound(id))?;
        let returned = listing.remaining;
        listing.returned = returned;
        listing.remaining = 0;
        listing.status = ListingStatus::Cancelled;
        Ok(returned)
    }
}
