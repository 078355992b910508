// ⚙️ Chain Configuration - explicit value object for the staging pipeline
// All chain constants (expected supply, genesis instant, snapshot identity)
// travel through this struct instead of module-level globals.

use chrono::{DateTime, TimeZone, Utc};
use primitive_types::U256;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Zero address used as the `from` side of genesis issuance rows
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Synthetic transaction hash marking genesis allocation rows
pub const GENESIS_TX_HASH: &str = "0xgenesis";

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Bounded timeout + retry policy for range-query RPC calls.
///
/// The naive approach of waiting indefinitely on the node is a defect:
/// every request carries `request_timeout`, transport failures are retried
/// with doubling backoff, and once `max_attempts` is exhausted the run
/// aborts with the checkpoint still pointing at the last durable page.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per page fetch (first try included)
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each retry
    pub initial_backoff: Duration,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff to sleep after the given zero-based failed attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt)
    }
}

// ============================================================================
// CHAIN CONFIG
// ============================================================================

/// Configuration for one chain's genesis extraction + staging run
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of the archive node
    pub rpc_url: String,
    /// Fixed snapshot identifier: the genesis block's state hash.
    /// Every page fetch targets this immutable trie.
    pub genesis_state_hash: String,
    /// Max entries requested per range-query page
    pub page_size: usize,
    /// Total wei the genesis allocation must sum to
    pub expected_supply: U256,
    /// The chain's fixed genesis instant
    pub genesis_timestamp: DateTime<Utc>,
    /// Native token id used on ledger rows
    pub token_id: i64,
    /// Snapshot CSV path (env `GENESIS_FILE` overrides)
    pub snapshot_path: PathBuf,
    /// Resumable cursor file, overwritten after each durable page
    pub checkpoint_path: PathBuf,
    /// SQLite database holding ledger + audit/supply tables
    pub db_path: PathBuf,
    pub retry: RetryPolicy,
}

impl ChainConfig {
    /// Mainnet constants: Frontier genesis state, 72,009,990.49948 ETH in wei
    pub fn mainnet() -> Self {
        ChainConfig {
            rpc_url: env::var("GENESIS_RPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8546".to_string()),
            genesis_state_hash:
                "0xd4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3"
                    .to_string(),
            page_size: 256,
            expected_supply: U256::from(72_009_990_499_480_000_000_000_000u128),
            genesis_timestamp: Utc
                .with_ymd_and_hms(2015, 7, 30, 0, 0, 0)
                .single()
                .expect("fixed genesis instant is a valid UTC datetime"),
            token_id: 1,
            snapshot_path: snapshot_path_from_env(),
            checkpoint_path: PathBuf::from("checkpoint.txt"),
            db_path: PathBuf::from("genesis_ledger.db"),
            retry: RetryPolicy::default(),
        }
    }
}

/// Resolve the snapshot file: `GENESIS_FILE` env var, else project-local default
fn snapshot_path_from_env() -> PathBuf {
    match env::var("GENESIS_FILE") {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from("genesis_alloc.csv"),
    }
}
