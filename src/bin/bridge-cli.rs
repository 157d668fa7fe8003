use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use stellar_bridge::config::loader::load_settings;
use stellar_bridge::engine::TxStatus;
use stellar_bridge::linker::DerivedAccountProvisioner;
use stellar_bridge::store::{BridgeStore, JsonFileStore};

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Inspection CLI for the Stellar bridge", long_about = None)]
struct Cli {
    /// Settings file; its store path is used unless --store is given.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bridge state file.
    #[arg(short, long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a settings file
    Validate,
    /// List account links
    Links,
    /// List transactions, optionally by status
    Transactions {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show the configuration history
    Configs,
    /// List reconciliation flags
    Flags,
    /// Print the derived external account for an internal account
    Address {
        /// Funding account id (G...)
        #[arg(long)]
        funding: String,
        /// Internal account id
        internal: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Validate => {
            let path = cli.config.as_ref().ok_or("--config is required for validate")?;
            let settings = load_settings(path)?;
            println!("{} is valid", path.display());
            if let Some(bridge) = &settings.bridge {
                println!("bridge configuration for {}", bridge.funding_account_identity);
            }
        }
        Commands::Links => print_json(&open_store(&cli)?.links()?)?,
        Commands::Transactions { status } => {
            let store = open_store(&cli)?;
            let transactions = match status {
                Some(status) => store.transactions_with_status(parse_status(status)?)?,
                None => store.transactions()?,
            };
            print_json(&transactions)?;
        }
        Commands::Configs => print_json(&open_store(&cli)?.configurations()?)?,
        Commands::Flags => print_json(&open_store(&cli)?.flags()?)?,
        Commands::Address { funding, internal } => {
            println!("{}", DerivedAccountProvisioner::derive(funding, internal));
        }
    }

    Ok(())
}

fn open_store(cli: &Cli) -> Result<JsonFileStore, Box<dyn std::error::Error>> {
    let path = match (&cli.store, &cli.config) {
        (Some(path), _) => path.clone(),
        (None, Some(config)) => load_settings(config)?
            .store
            .path
            .map(PathBuf::from)
            .ok_or("settings file has no store path")?,
        (None, None) => return Err("either --store or --config is required".into()),
    };
    if !path.exists() {
        return Err(format!("state file {} does not exist", path.display()).into());
    }
    Ok(JsonFileStore::open(path)?)
}

fn parse_status(s: &str) -> Result<TxStatus, Box<dyn std::error::Error>> {
    match s.to_ascii_uppercase().as_str() {
        "BUILT" => Ok(TxStatus::Built),
        "SUBMITTED" => Ok(TxStatus::Submitted),
        "CONFIRMED" => Ok(TxStatus::Confirmed),
        "FAILED" => Ok(TxStatus::Failed),
        "ABANDONED" => Ok(TxStatus::Abandoned),
        other => Err(format!("unknown status '{}'", other).into()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
