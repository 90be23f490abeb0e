//! Fund market CLI - deployment plans and marketplace scenarios

use std::path::PathBuf;

use clap::Parser;
use fundmarket::logging::{self, LoggingConfig};
use fundmarket::scenario::{self, ScenarioParams};
use fundmarket::MarketConfig;

#[derive(Parser)]
#[command(name = "fundmarket")]
#[command(about = "Fund certificate marketplace", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print the resolved deployment order
    Plan,
    /// Deploy and run the listing/purchase scenario
    Scenario {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Write the final exchange state as JSON
        #[arg(long)]
        state_out: Option<PathBuf>,
    },
    /// Write a default config file
    InitConfig {
        /// Destination (defaults to the user config directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&LoggingConfig::from_env())?;

    match cli.command {
        Commands::Plan => {
            let config = MarketConfig::load(cli.config.as_deref())?;
            let plan = config.plan();
            for (step, spec) in plan.resolve()?.iter().enumerate() {
                if spec.depends_on.is_empty() {
                    println!("{}. {} ({})", step + 1, spec.name, spec.kind);
                } else {
                    println!(
                        "{}. {} ({}) <- {}",
                        step + 1,
                        spec.name,
                        spec.kind,
                        spec.depends_on.join(", ")
                    );
                }
            }
        }
        Commands::Scenario { json, state_out } => {
            let config = MarketConfig::load(cli.config.as_deref())?;
            let mut exchange = config.plan().deploy(&config)?;
            let report = scenario::run(&mut exchange, &ScenarioParams::default())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Asset {} on {}", report.asset_id, report.contract);
                if let Some(wrapper) = &report.wrapper_address {
                    println!("  wrapper:            {}", wrapper);
                }
                println!("  buyer holding:      {}", report.buyer_holding);
                println!("  publisher holding:  {}", report.publisher_holding);
                println!("  escrowed:           {}", report.escrowed);
                for listing in &report.listings {
                    println!(
                        "  listing {}: {} remaining ({})",
                        listing.listing_id, listing.remaining, listing.status
                    );
                }
                println!(
                    "  journal:            {} entries, verified: {}",
                    report.journal_entries, report.journal_verified
                );
            }

            if let Some(path) = state_out {
                std::fs::write(&path, serde_json::to_string_pretty(&exchange)?)?;
                println!("State written to {}", path.display());
            }
        }
        Commands::InitConfig { path } => {
            let path = match path.or(cli.config) {
                Some(path) => path,
                None => MarketConfig::config_path()?,
            };
            MarketConfig::default().save(&path)?;
            println!("Config written to {}", path.display());
        }
    }

    Ok(())
}
