//! Fund certificate marketplace
//!
//! This crate provides a payment token ledger, a multi-id asset ledger for
//! fund certificates, a wrapper registry and a marketplace that escrows
//! publisher listings and settles batched purchases atomically.

pub mod asset;
pub mod config;
pub mod deploy;
pub mod error;
pub mod exchange;
pub mod journal;
pub mod logging;
pub mod marketplace;
pub mod provider;
pub mod scenario;
pub mod token;
pub mod types;

pub use asset::{AssetInfo, AssetLedger, IssueTerms};
pub use config::{MarketConfig, MarketplaceConfig, TokenConfig};
pub use deploy::{ContractKind, ContractSpec, DeployError, DeploymentPlan};
pub use error::{MarketError, Result};
pub use exchange::{Exchange, SharedExchange};
pub use journal::{Event, EventKind, Journal, JournalEntry, JournalError, JournalFilters};
pub use logging::{LogFormat, LoggingConfig};
pub use marketplace::{Listing, ListingStatus, Marketplace, Purchase};
pub use provider::{WrapperRecord, WrapperRegistry};
pub use scenario::{ScenarioParams, ScenarioReport};
pub use token::PaymentToken;
pub use types::{Address, Amount, AssetId, ContractId, ListingId, Lot, Settlement};
