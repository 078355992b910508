use anyhow::Result;
use std::env;
use std::process;

use genesis_ledger::{
    load_and_filter, ChainConfig, Extractor, HttpRpcClient, StageError, Stager,
    SqliteAuditStore, SqliteLedgerStore,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let outcome = match args.get(1).map(String::as_str) {
        Some("extract") => run_extract(),
        Some("stage") => run_stage(),
        _ => {
            eprintln!("Usage: genesis-ledger <extract|stage>");
            eprintln!("  extract  walk the genesis state trie into the snapshot CSV");
            eprintln!("  stage    validate the snapshot and stage it into the ledger");
            process::exit(1);
        }
    };

    if let Err(e) = outcome {
        eprintln!("❌ {:#}", e);
        process::exit(1);
    }
}

fn run_extract() -> Result<()> {
    let config = ChainConfig::mainnet();

    println!("📥 Extracting genesis allocation");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("   node:     {}", config.rpc_url);
    println!("   snapshot: {}", config.snapshot_path.display());

    let client = HttpRpcClient::new(&config.rpc_url, &config.genesis_state_hash, config.retry.clone())?;
    let summary = Extractor::new(&config).run(&client)?;

    if summary.already_complete {
        println!("✓ Extraction already complete, nothing to do");
        return Ok(());
    }

    if summary.resumed {
        println!("✓ Resumed from checkpoint");
    }
    println!("✓ Pages fetched: {}", summary.pages);
    println!("✓ Accounts extracted: {}", summary.accounts);
    println!("✓ Running total: {} wei", summary.total_wei);
    println!("🎉 Snapshot written to {}", config.snapshot_path.display());

    Ok(())
}

fn run_stage() -> Result<()> {
    let config = ChainConfig::mainnet();

    println!("📄 Loading genesis allocs from: {}", config.snapshot_path.display());
    let set = load_and_filter(&config.snapshot_path)?;
    if set.skipped > 0 {
        println!("⚠️  Skipped {} malformed row(s) while loading", set.skipped);
    }
    if set.duplicates > 0 {
        println!("⚠️  Collapsed {} duplicated row(s) from re-fetched pages", set.duplicates);
    }
    println!("✓ Loaded {} account balances", set.balances.len());

    let mut ledger = SqliteLedgerStore::open(&config.db_path)?;
    let mut audit = SqliteAuditStore::open(&config.db_path)?;

    let result = match Stager::new(&config).stage(&set, &mut ledger, &mut audit) {
        Ok(result) => result,
        Err(StageError::SupplyMismatch { expected, actual }) => {
            eprintln!("❌ Mismatch in genesis supply!");
            eprintln!("   Expected: {} wei", expected);
            eprintln!("   Got:      {} wei", actual);
            process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    println!("✅ Verified genesis supply: {} wei", result.total_wei);
    println!("✅ Accounts: {}", result.accounts);
    println!("✓ Ledger rows written: {}", result.entries_written);
    println!("✓ Ledger row count: {}", ledger.verify_count()?);
    println!("🎉 Staged genesis into ledger, audit, and supply successfully.");

    Ok(())
}
