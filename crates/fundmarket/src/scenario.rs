//! End-to-end listing and purchase scenario
//!
//! A publisher receives a fund certificate issue, lists three lots of 3000
//! units of asset 0, and a buyer takes 1000 units from each lot in one
//! batch.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::asset::IssueTerms;
use crate::error::{MarketError, Result};
use crate::exchange::Exchange;
use crate::types::{Address, Amount, AssetId, ContractId, ListingId, Lot};

/// One whole payment token with 18 decimals
pub const ONE_TOKEN: Amount = 1_000_000_000_000_000_000;

/// Issue date used by the scenario (unix seconds)
pub const ISSUE_DATE: i64 = 1_680_681_300;

/// Interest term used by the scenario, in days
pub const INTEREST_TERM_DAYS: u32 = 92;

/// Parameters of the scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub publisher: Address,
    pub buyer: Address,
    pub lots: usize,
    pub lot_size: Amount,
    pub buy_per_lot: Amount,
    pub unit_price: Amount,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            publisher: Address::new("0xpublisher1"),
            buyer: Address::new("0xbuyer"),
            lots: 3,
            lot_size: 3_000,
            buy_per_lot: 1_000,
            unit_price: ONE_TOKEN,
        }
    }
}

/// State after one listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingReport {
    pub listing_id: ListingId,
    pub remaining: Amount,
    pub status: String,
}

/// Outcome of the scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub contract: ContractId,
    pub asset_id: AssetId,
    pub wrapper_address: Option<Address>,
    pub buyer_holding: Amount,
    pub publisher_holding: Amount,
    pub escrowed: Amount,
    pub buyer_payment_balance: Amount,
    pub publisher_payment_balance: Amount,
    pub listings: Vec<ListingReport>,
    pub journal_entries: usize,
    pub journal_verified: bool,
}

/// Run the scenario on a freshly deployed exchange
pub fn run(exchange: &mut Exchange, params: &ScenarioParams) -> Result<ScenarioReport> {
    let owner = exchange.market().admin.clone();
    let escrow = exchange.marketplace_account().clone();
    let contract = exchange
        .ledgers()
        .next()
        .map(|ledger| ledger.contract.clone())
        .ok_or_else(|| MarketError::ContractNotFound(ContractId::new("asset ledger")))?;

    let lots = params.lots as Amount;
    let supply = params
        .lot_size
        .checked_mul(lots)
        .ok_or(MarketError::Overflow)?;
    let cost = params
        .buy_per_lot
        .checked_mul(lots)
        .and_then(|units| units.checked_mul(params.unit_price))
        .ok_or(MarketError::Overflow)?;

    if exchange.ledger(&contract)?.provider.is_some() {
        exchange.set_creator(&owner, &contract)?;
    }
    let asset_id = exchange.issue(
        &owner,
        &contract,
        &params.publisher,
        IssueTerms {
            issue_date: ISSUE_DATE,
            supply,
            interest_term_days: INTEREST_TERM_DAYS,
            unit_price: params.unit_price,
        },
    )?;

    exchange.add_publisher(&owner, &params.publisher)?;
    exchange.set_approval_for_all(&contract, &params.publisher, &escrow, true)?;
    let mut listing_ids = Vec::with_capacity(params.lots);
    for _ in 0..params.lots {
        listing_ids.push(exchange.sell_item(
            &params.publisher,
            &contract,
            asset_id,
            params.lot_size,
            params.unit_price,
        )?);
    }

    exchange.mint(&owner, &params.buyer, cost)?;
    exchange.approve(&params.buyer, &escrow, cost);
    let batch: Vec<Lot> = listing_ids
        .iter()
        .map(|id| Lot::new(*id, params.buy_per_lot))
        .collect();
    exchange.buy_item(&params.buyer, &batch)?;

    let listings = listing_ids
        .iter()
        .map(|id| {
            exchange.market().listing(*id).map(|listing| ListingReport {
                listing_id: listing.id,
                remaining: listing.remaining,
                status: listing.status.as_str().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let report = ScenarioReport {
        wrapper_address: exchange.wrapper_address(asset_id).cloned(),
        buyer_holding: exchange.asset_balance(&contract, &params.buyer, asset_id)?,
        publisher_holding: exchange.asset_balance(&contract, &params.publisher, asset_id)?,
        escrowed: exchange.escrowed(&contract, asset_id),
        buyer_payment_balance: exchange.balance_of(&params.buyer),
        publisher_payment_balance: exchange.balance_of(&params.publisher),
        listings,
        journal_entries: exchange.journal().len(),
        journal_verified: exchange.journal().verify().is_ok(),
        contract,
        asset_id,
    };
    info!(
        buyer_holding = %report.buyer_holding,
        escrowed = %report.escrowed,
        "scenario complete"
    );
    Ok(report)
}
