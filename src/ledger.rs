// 📒 Ledger Models & Store Ports
// One immutable LedgerEntry per genesis account, plus the block-0 audit and
// supply records. Stores are narrow ports so the stager can be exercised
// against in-memory fakes.

use crate::config::{ChainConfig, GENESIS_TX_HASH, ZERO_ADDRESS};
use crate::validator::AccountBalance;
use chrono::{DateTime, Datelike, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("genesis supply mismatch: expected {expected} wei, got {actual} wei")]
    SupplyMismatch { expected: U256, actual: U256 },

    /// Uniqueness constraint hit: the block is already staged. A recoverable
    /// "refused duplicate write" signal, not a crash.
    #[error("block {0} is already staged; refusing duplicate write")]
    AlreadyStaged(i64),

    #[error("staged total overflowed 256 bits")]
    Overflow,

    #[error("ledger store write failed: {0}")]
    Ledger(String),

    #[error("audit/supply store write failed: {0}")]
    Audit(String),
}

// ============================================================================
// LEDGER ENTRY
// ============================================================================

/// Append-only value-transfer record; created once at staging, never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub block_number: i64,
    pub block_ts: DateTime<Utc>,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    /// Decimal string so arbitrary-precision amounts survive every store
    pub amount_wei: String,
    pub token_id: i64,
    pub tx_type: String,
    pub tx_subtype: String,
    pub success: bool,
    // Partition keys derived from block_ts
    pub year: i32,
    pub month: u32,
}

impl LedgerEntry {
    /// Idempotency key enforced UNIQUE at the store boundary.
    /// Genesis rows share one tx_hash, so the receiving address is part
    /// of the key.
    pub fn idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}{}", self.tx_hash, self.to_address));
        format!("{:x}", hasher.finalize())
    }
}

/// Build one issuance row per genesis account
pub fn build_genesis_entries(
    config: &ChainConfig,
    balances: &[AccountBalance],
) -> Vec<LedgerEntry> {
    balances
        .iter()
        .map(|account| LedgerEntry {
            block_number: 0,
            block_ts: config.genesis_timestamp,
            tx_hash: GENESIS_TX_HASH.to_string(),
            from_address: ZERO_ADDRESS.to_string(),
            to_address: account.address.clone(),
            amount_wei: account.balance.to_string(),
            token_id: config.token_id,
            tx_type: "alloc".to_string(),
            tx_subtype: "issuance".to_string(),
            success: true,
            year: config.genesis_timestamp.year(),
            month: config.genesis_timestamp.month(),
        })
        .collect()
}

// ============================================================================
// AUDIT & SUPPLY RECORDS
// ============================================================================

/// Per-block reconciliation row proving issuance equals the expected delta
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub block_number: i64,
    pub block_ts: DateTime<Utc>,
    pub expected_delta: String,
    pub actual_delta: String,
    pub variance: String,
    pub within_margin: bool,
    pub balanced: bool,
    pub posted: bool,
    pub checked_at: DateTime<Utc>,
    pub chain_hash: String,
}

/// Per-block accounting of issuance, burn, tips and withdrawals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyRecord {
    pub block_number: i64,
    pub block_ts: DateTime<Utc>,
    pub issuance_wei: String,
    pub burn_wei: String,
    pub tips_wei: String,
    pub withdrawals_wei: String,
    pub net_delta_wei: String,
    pub tx_count: i64,
}

// ============================================================================
// STORE PORTS
// ============================================================================

/// Append port of the partitioned ledger store
pub trait LedgerStore {
    fn append_entries(&mut self, entries: &[LedgerEntry]) -> Result<usize, StageError>;
}

/// Audit/supply store: pre-flight idempotency check + one scoped transaction
/// writing both block rows or neither.
pub trait AuditStore {
    fn is_block_staged(&self, block_number: i64) -> Result<bool, StageError>;
    fn commit_block(&mut self, audit: &AuditRecord, supply: &SupplyRecord)
        -> Result<(), StageError>;
}
