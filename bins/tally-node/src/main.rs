//! Tally ledger node binary.
//!
//! Opens the RocksDB ledger and runs one maintenance or query command
//! against it: importing blocks from JSON, rolling back the tail, and
//! inspecting blocks, transactions and addresses.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tally_core::traits::ChainView;
use tally_core::types::{Address, Block, Hash256};
use tally_store::{Ledger, LedgerConfig};

#[derive(Parser, Debug)]
#[command(name = "tally-node", version, about = "Single-node UTXO ledger")]
struct Args {
    /// Data directory (overrides the config file and TALLY_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the chain tail and counters.
    Info,
    /// Validate and commit blocks from a JSON array file, in order.
    Import {
        file: PathBuf,
        /// Keep going after a rejected block instead of stopping.
        #[arg(long)]
        keep_going: bool,
    },
    /// Run validation on blocks from a JSON array file without committing.
    Check { file: PathBuf },
    /// Remove tail blocks down to and including `--from`.
    Rollback {
        #[arg(long)]
        from: u64,
    },
    /// Print a block by height or hash.
    ShowBlock { id: String },
    /// Print a transaction record by hash.
    ShowTransaction { hash: String },
    /// Print the output held by an address and whether it is spent.
    ShowAddress { address: String },
    /// Print the number of keys in each index.
    Stats,
    /// Compact the underlying database.
    Compact,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = LedgerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level, &args.log_format);
    info!("Tally node v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data_dir {:?}", config.data_dir))?;
    let ledger = Ledger::open(&config).context("failed to open ledger")?;

    match args.command {
        Command::Info => print_info(&ledger),
        Command::Import { file, keep_going } => import(&ledger, &file, keep_going),
        Command::Check { file } => check(&ledger, &file),
        Command::Rollback { from } => {
            let removed = ledger.delete_blocks_from(from)?;
            ledger.flush()?;
            println!("removed {removed} block(s); height is now {}", ledger.block_height()?);
            Ok(())
        }
        Command::ShowBlock { id } => show_block(&ledger, &id),
        Command::ShowTransaction { hash } => {
            let hash = Hash256::from_hex(&hash).context("invalid transaction hash")?;
            match ledger.transaction_by_hash(&hash)? {
                Some(record) => print_json(&record),
                None => bail!("transaction {hash} not found"),
            }
        }
        Command::ShowAddress { address } => show_address(&ledger, &address),
        Command::Stats => {
            for (name, count) in ledger.stats()? {
                println!("{name:<32} {count}");
            }
            Ok(())
        }
        Command::Compact => {
            ledger.compact();
            println!("compaction complete");
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_blocks(file: &PathBuf) -> Result<Vec<Block>> {
    let text = std::fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
    serde_json::from_str(&text).with_context(|| format!("{file:?} is not a JSON array of blocks"))
}

fn print_info(ledger: &Ledger) -> Result<()> {
    let view = ledger.view();
    let height = view.block_height()?;
    println!("height:       {height}");
    println!("transactions: {}", view.transaction_count()?);
    println!("outputs:      {}", view.output_count()?);
    if let Some(tail) = view.tail_block()? {
        println!("tail hash:    {}", tail.hash()?);
        println!("tail time:    {}", tail.timestamp);
    }
    Ok(())
}

fn import(ledger: &Ledger, file: &PathBuf, keep_going: bool) -> Result<()> {
    let blocks = read_blocks(file)?;
    let mut committed = 0usize;
    for block in &blocks {
        if ledger.add_block(block)? {
            committed += 1;
            continue;
        }
        let reason = ledger.check_block(block).err().map(|e| e.to_string()).unwrap_or_default();
        warn!(height = block.height, %reason, "block rejected");
        if !keep_going {
            ledger.flush()?;
            bail!("block at height {} rejected: {reason}", block.height);
        }
    }
    ledger.flush()?;
    println!("committed {committed} of {} block(s); height is now {}", blocks.len(), ledger.block_height()?);
    Ok(())
}

fn check(ledger: &Ledger, file: &PathBuf) -> Result<()> {
    for block in read_blocks(file)? {
        match ledger.check_block(&block) {
            Ok(()) => println!("height {}: ok", block.height),
            Err(e) => println!("height {}: rejected: {e}", block.height),
        }
    }
    Ok(())
}

fn show_block(ledger: &Ledger, id: &str) -> Result<()> {
    let block = match id.parse::<u64>() {
        Ok(height) => ledger.block_by_height(height)?,
        Err(_) => ledger.block_by_hash(&Hash256::from_hex(id).context("expected a height or block hash")?)?,
    };
    match block {
        Some(block) => print_json(&block),
        None => bail!("block {id} not found"),
    }
}

fn show_address(ledger: &Ledger, address: &str) -> Result<()> {
    let address: Address = address.parse().context("invalid address")?;
    let view = ledger.view();
    let Some(output) = view.output_by_address(&address)? else {
        bail!("address {address} has never received an output");
    };
    let spent = view.spent_output_by_address(&address)?.is_some();
    print_json(&serde_json::json!({
        "address": address.to_string(),
        "output": output,
        "spent": spent,
        "spent_by": view.destination_transaction(&output.id)?.map(|tx| tx.hash),
    }))
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .init();
    }
}
