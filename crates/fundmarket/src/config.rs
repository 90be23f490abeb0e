//! Fund market configuration

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::deploy::{ContractSpec, DeploymentPlan};
use crate::types::Address;

/// Fund market configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Deployer; owns the token, ledgers and registry and administers the
    /// marketplace
    pub owner: Address,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    /// Contracts to deploy, with their dependencies
    #[serde(default = "default_contracts")]
    pub contracts: Vec<ContractSpec>,
}

fn default_contracts() -> Vec<ContractSpec> {
    DeploymentPlan::default().contracts
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            owner: Address::new("0xowner"),
            token: TokenConfig::default(),
            marketplace: MarketplaceConfig::default(),
            contracts: default_contracts(),
        }
    }
}

/// Payment token configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub symbol: String,
    pub decimals: u8,
    /// Let any account mint (test networks only)
    pub open_faucet: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            symbol: "BUSD".to_string(),
            decimals: 18,
            open_faucet: false,
        }
    }
}

/// Marketplace configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Escrow, reserve and fee account
    pub account: Address,
    /// Purchase fee in basis points
    pub fee_bps: u32,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            account: Address::new("marketplace"),
            fee_bps: 0,
        }
    }
}

impl MarketConfig {
    /// Load config from `path`, or the default location, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let config: MarketConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config as pretty TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("fundmarket").join("config.toml"))
    }

    /// Deployment plan declared by this config
    pub fn plan(&self) -> DeploymentPlan {
        DeploymentPlan::new(self.contracts.clone())
    }
}
