//! Command-line surface: the batch `run` entry plus the operational
//! tooling for inspecting the frontier and correcting links.

use clap::{Parser, Subcommand};
use std::io::Write;

use crate::config::{Config, Env};
use crate::error::PreconditionError;
use crate::reconcile::{backfill, gap, linker};

#[derive(Debug, Parser)]
#[command(name = "reconciler")]
#[command(about = "Swap-to-trade reconciliation and identity backfill")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub env: Env,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile every configured base asset, oldest work first
    Run,
    /// Print the unreconciled frontier for one base asset
    Status {
        #[arg(long = "base-asset")]
        base_asset_id: i64,
        /// Emit machine-readable JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Inspect or correct trade-swap links
    Links {
        #[command(subcommand)]
        command: LinksCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum LinksCommand {
    /// List link rows, optionally filtered by trade and/or swap id
    List {
        #[arg(long)]
        trade: Option<i64>,
        #[arg(long)]
        swap: Option<i64>,
    },
    /// Remove one link so the swap reappears as a derivation candidate
    Remove {
        #[arg(long)]
        trade: i64,
        #[arg(long)]
        swap: i64,
    },
}

#[derive(serde::Serialize)]
struct StatusOutput {
    base_asset_id: i64,
    unlinked_range: Option<gap::BlockRange>,
    resume_block: Option<u64>,
    unprocessed_txns: usize,
    unresolved_addresses: Vec<String>,
}

pub async fn run_command(config: Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run => {
            ensure_base_assets(&config)?;
            crate::run(config).await
        }
        Commands::Status {
            base_asset_id,
            json,
        } => status(config, base_asset_id, json).await,
        Commands::Links { command } => links(config, command).await,
    }
}

async fn status(config: Config, base_asset_id: i64, json: bool) -> anyhow::Result<()> {
    let pool = config.get_sqlite_pool().await?;
    sqlx::migrate!().run(&pool).await?;

    let unlinked_range = gap::unlinked_block_range(&pool, base_asset_id).await?;
    let resume_block = gap::resume_block(&pool, base_asset_id).await?;
    let unprocessed = match resume_block {
        Some(block) => gap::unprocessed_tx_hashes(&pool, base_asset_id, block).await?,
        None => Vec::new(),
    };
    let unresolved = backfill::unresolved_address_strings(&pool, base_asset_id).await?;

    let output = StatusOutput {
        base_asset_id,
        unlinked_range,
        resume_block,
        unprocessed_txns: unprocessed.len(),
        unresolved_addresses: unresolved,
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
        return Ok(());
    }

    match output.unlinked_range {
        Some(range) => writeln!(
            out,
            "base asset {base_asset_id}: unlinked blocks {}..={}, resume at {}, {} unprocessed txn(s)",
            range.min_block,
            range.max_block,
            output.resume_block.unwrap_or(range.min_block),
            output.unprocessed_txns,
        )?,
        None => writeln!(out, "base asset {base_asset_id}: fully reconciled")?,
    }
    if !output.unresolved_addresses.is_empty() {
        writeln!(
            out,
            "{} raw address string(s) still await canonical records:",
            output.unresolved_addresses.len()
        )?;
        for address in &output.unresolved_addresses {
            writeln!(out, "  {address}")?;
        }
    }

    Ok(())
}

async fn links(config: Config, command: LinksCommand) -> anyhow::Result<()> {
    let pool = config.get_sqlite_pool().await?;
    sqlx::migrate!().run(&pool).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match command {
        LinksCommand::List { trade, swap } => {
            let links = linker::TradeSwapLink::list(&pool, trade, swap).await?;
            if links.is_empty() {
                writeln!(out, "no links")?;
                return Ok(());
            }
            for link in links {
                let contributed = link
                    .contributed_amount
                    .map_or_else(|| "-".to_string(), |amount| amount.to_string());
                writeln!(
                    out,
                    "trade {} <- swap {} (contributed {contributed})",
                    link.trade_id, link.swap_id
                )?;
            }
        }
        LinksCommand::Remove { trade, swap } => {
            if linker::TradeSwapLink::remove(&pool, trade, swap).await? {
                writeln!(out, "removed link trade {trade} <- swap {swap}")?;
            } else {
                writeln!(out, "no link between trade {trade} and swap {swap}")?;
            }
        }
    }

    Ok(())
}

/// Guard for the `run` subcommand: an empty base asset list is a
/// misconfiguration, not an empty batch.
fn ensure_base_assets(config: &Config) -> Result<(), PreconditionError> {
    if config.base_assets.is_empty() {
        return Err(PreconditionError::NoBaseAssets);
    }
    Ok(())
}
