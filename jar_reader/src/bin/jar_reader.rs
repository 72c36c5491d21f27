use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jar_reader::{
    common::parse_address, config::ReaderConfig, JarFilter, JarReadModel,
};
use log::info;
use serde::Serialize;
use std::path::PathBuf;

/// Cookie Jar multi-chain reader
#[derive(Parser)]
#[clap(name = "jar_reader")]
#[clap(about = "Read Cookie Jar state across EVM chains")]
struct Args {
    /// Path to a TOML configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List jars on every enabled chain
    Jars {
        /// Only jars owned by this address
        #[clap(long)]
        owner: Option<String>,

        /// Include blacklisted jars
        #[clap(long)]
        include_blacklisted: bool,
    },
    /// Read one jar
    Jar { chain_id: u64, address: String },
    /// Resolve token symbols
    Symbols {
        chain_id: u64,
        #[clap(required = true)]
        addresses: Vec<String>,
    },
    /// Show the roles held by an address
    Whoami { address: String },
    /// List the configured chains
    Chains,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ReaderConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let model = JarReadModel::from_config(&config)?;

    match args.command {
        Command::Jars {
            owner,
            include_blacklisted,
        } => {
            let filter = JarFilter {
                owner: owner.as_deref().map(parse_address).transpose()?,
                include_blacklisted,
            };
            let page = model.all_jars(&filter).await?;
            if page.partial {
                info!("Listing is partial, failed chains: {:?}", page.failed_chains);
            }
            print_json(&page)
        }
        Command::Jar { chain_id, address } => print_json(&model.jar(chain_id, &address).await?),
        Command::Symbols { chain_id, addresses } => {
            let parsed = addresses
                .iter()
                .map(|a| parse_address(a))
                .collect::<jar_reader::Result<Vec<_>>>()?;
            let symbols = model.symbols(chain_id, &parsed).await;
            let ordered: Vec<(String, String)> = parsed
                .iter()
                .map(|a| {
                    let symbol = symbols.get(a).cloned().unwrap_or_default();
                    (jar_reader::common::format_address(a), symbol)
                })
                .collect();
            print_json(&ordered)
        }
        Command::Whoami { address } => print_json(&model.authorization(&address).await?),
        Command::Chains => {
            let chains: Vec<_> = model.registry().iter().collect();
            print_json(&chains)
        }
    }
}
