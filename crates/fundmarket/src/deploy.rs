//! Deployment plan
//!
//! Contracts are declared with their dependencies and deployed in
//! topological order. Among contracts that are ready at the same time,
//! declaration order wins.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::info;

use crate::asset::AssetLedger;
use crate::config::MarketConfig;
use crate::exchange::Exchange;
use crate::marketplace::Marketplace;
use crate::provider::WrapperRegistry;
use crate::token::PaymentToken;
use crate::types::{BPS_DENOMINATOR, ContractId};

/// Role a deployed contract plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    PaymentToken,
    Provider,
    AssetLedger,
    Marketplace,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentToken => "payment_token",
            Self::Provider => "provider",
            Self::AssetLedger => "asset_ledger",
            Self::Marketplace => "marketplace",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors in a deployment plan
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeployError {
    #[error("Contract declared twice: {0}")]
    DuplicateContract(String),

    #[error("{contract} depends on unknown contract {dependency}")]
    UnknownDependency { contract: String, dependency: String },

    #[error("Dependency cycle among: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Plan has no {0} contract")]
    MissingKind(ContractKind),

    #[error("Plan has more than one {0} contract")]
    DuplicateKind(ContractKind),

    #[error("{contract} must depend on the {kind} contract")]
    MissingDependency { contract: String, kind: ContractKind },

    #[error("Marketplace fee of {0} bps is out of range")]
    InvalidFee(u32),
}

/// One contract of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub name: String,
    pub kind: ContractKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ContractSpec {
    pub fn new(name: impl Into<String>, kind: ContractKind) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }
}

/// Ordered list of contracts to deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub contracts: Vec<ContractSpec>,
}

impl Default for DeploymentPlan {
    /// Payment token, wrapper registry, fund certificate ledger, marketplace
    fn default() -> Self {
        Self {
            contracts: vec![
                ContractSpec::new("BUSD", ContractKind::PaymentToken),
                ContractSpec::new("FundCertProvider", ContractKind::Provider),
                ContractSpec::new("FundCertificate", ContractKind::AssetLedger)
                    .depends_on("BUSD")
                    .depends_on("FundCertProvider"),
                ContractSpec::new("Marketplace", ContractKind::Marketplace)
                    .depends_on("FundCertificate")
                    .depends_on("BUSD"),
            ],
        }
    }
}

impl DeploymentPlan {
    pub fn new(contracts: Vec<ContractSpec>) -> Self {
        Self { contracts }
    }

    fn find(&self, name: &str) -> Option<&ContractSpec> {
        self.contracts.iter().find(|spec| spec.name == name)
    }

    fn single(&self, kind: ContractKind) -> Result<&ContractSpec, DeployError> {
        let mut matching = self.contracts.iter().filter(|spec| spec.kind == kind);
        let first = matching.next().ok_or(DeployError::MissingKind(kind))?;
        if matching.next().is_some() {
            return Err(DeployError::DuplicateKind(kind));
        }
        Ok(first)
    }

    /// Check the plan and return the deployment order
    pub fn resolve(&self) -> Result<Vec<&ContractSpec>, DeployError> {
        let mut names = HashSet::new();
        for spec in &self.contracts {
            if !names.insert(spec.name.as_str()) {
                return Err(DeployError::DuplicateContract(spec.name.clone()));
            }
        }
        for spec in &self.contracts {
            if let Some(dependency) = spec.depends_on.iter().find(|dep| !names.contains(dep.as_str())) {
                return Err(DeployError::UnknownDependency {
                    contract: spec.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let token = self.single(ContractKind::PaymentToken)?;
        self.single(ContractKind::Marketplace)?;
        if self.contracts.iter().filter(|spec| spec.kind == ContractKind::Provider).count() > 1 {
            return Err(DeployError::DuplicateKind(ContractKind::Provider));
        }
        for spec in &self.contracts {
            let needs_token = matches!(spec.kind, ContractKind::AssetLedger | ContractKind::Marketplace);
            if needs_token && !spec.depends_on.contains(&token.name) {
                return Err(DeployError::MissingDependency {
                    contract: spec.name.clone(),
                    kind: ContractKind::PaymentToken,
                });
            }
        }

        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.contracts.len());
        while order.len() < self.contracts.len() {
            let next = self.contracts.iter().find(|spec| {
                !placed.contains(spec.name.as_str())
                    && spec.depends_on.iter().all(|dep| placed.contains(dep.as_str()))
            });
            match next {
                Some(spec) => {
                    placed.insert(spec.name.as_str());
                    order.push(spec);
                }
                None => {
                    let stuck = self
                        .contracts
                        .iter()
                        .filter(|spec| !placed.contains(spec.name.as_str()))
                        .map(|spec| spec.name.clone())
                        .collect();
                    return Err(DeployError::Cycle(stuck));
                }
            }
        }
        Ok(order)
    }

    /// Deploy every contract in order and assemble the exchange
    pub fn deploy(&self, config: &MarketConfig) -> Result<Exchange, DeployError> {
        if config.marketplace.fee_bps > BPS_DENOMINATOR {
            return Err(DeployError::InvalidFee(config.marketplace.fee_bps));
        }
        let order = self.resolve()?;

        let mut token = None;
        let mut provider = None;
        let mut ledgers = Vec::new();
        let mut market = None;

        for (step, spec) in order.iter().enumerate() {
            match spec.kind {
                ContractKind::PaymentToken => {
                    token = Some(
                        PaymentToken::new(
                            spec.name.as_str(),
                            config.token.symbol.clone(),
                            config.token.decimals,
                            config.owner.clone(),
                        )
                        .with_open_faucet(config.token.open_faucet),
                    );
                }
                ContractKind::Provider => {
                    provider = Some(WrapperRegistry::new(spec.name.as_str(), config.owner.clone()));
                }
                ContractKind::AssetLedger => {
                    let mut ledger = AssetLedger::new(spec.name.as_str(), config.owner.clone());
                    let linked = spec.depends_on.iter().find(|dep| {
                        self.find(dep)
                            .is_some_and(|dep| dep.kind == ContractKind::Provider)
                    });
                    if let Some(provider_name) = linked {
                        ledger = ledger.with_provider(ContractId::new(provider_name.as_str()));
                    }
                    ledgers.push(ledger);
                }
                ContractKind::Marketplace => {
                    market = Some(
                        Marketplace::new(
                            spec.name.as_str(),
                            config.owner.clone(),
                            config.marketplace.account.clone(),
                        )
                        .with_fee_bps(config.marketplace.fee_bps),
                    );
                }
            }
            info!(step, contract = %spec.name, kind = %spec.kind, "deployed contract");
        }

        let token = token.ok_or(DeployError::MissingKind(ContractKind::PaymentToken))?;
        let market = market.ok_or(DeployError::MissingKind(ContractKind::Marketplace))?;
        let mut exchange = Exchange::new(token, market);
        if let Some(provider) = provider {
            exchange = exchange.with_provider(provider);
        }
        for ledger in ledgers {
            exchange = exchange.with_ledger(ledger);
        }
        Ok(exchange)
    }
}
