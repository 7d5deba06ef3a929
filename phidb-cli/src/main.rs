//! `PhiDB` CLI tool for key management.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use phidb::key_vault::KeyVault;
use phidb_key_file::FileKeyVault;

#[derive(Parser)]
#[command(name = "phidb")]
#[command(about = "PhiDB key management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a key directory with a fresh master key
    Init {
        /// Key directory to provision
        #[arg(short, long, default_value = "./keys")]
        key_dir: String,
    },
    /// Create (or confirm) a data key under an alt-name
    CreateKey {
        /// Key directory
        #[arg(short, long, default_value = "./keys")]
        key_dir: String,
        /// Data key alt-name (e.g. primary-phi-key)
        #[arg(long)]
        name: String,
    },
    /// List the alt-names with a stored data key
    ListKeys {
        /// Key directory
        #[arg(short, long, default_value = "./keys")]
        key_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { key_dir } => {
            FileKeyVault::init(&key_dir)
                .with_context(|| format!("initializing key directory {key_dir}"))?;
            println!("initialized key directory: {key_dir}");
        }
        Commands::CreateKey { key_dir, name } => {
            let vault = FileKeyVault::new(&key_dir)
                .with_context(|| format!("opening key directory {key_dir}"))?;
            vault
                .get_or_create_data_key(&name)
                .with_context(|| format!("creating data key {name}"))?;
            println!("data key ready: {name}");
        }
        Commands::ListKeys { key_dir } => {
            let vault = FileKeyVault::new(&key_dir)
                .with_context(|| format!("opening key directory {key_dir}"))?;
            for name in vault.list_alt_names().context("listing data keys")? {
                println!("{name}");
            }
        }
    }

    Ok(())
}
