// Genesis Ledger - Core Library
// Extracts a chain's genesis allocation over RPC, validates the snapshot,
// and stages it into the append-only accounting ledger.

pub mod config;
pub mod db;
pub mod extractor;
pub mod ledger;
pub mod rpc;
pub mod staging;
pub mod validator;

// Re-export commonly used types
pub use config::{ChainConfig, RetryPolicy, GENESIS_TX_HASH, ZERO_ADDRESS};
pub use db::{SqliteAuditStore, SqliteLedgerStore};
pub use extractor::{Checkpoint, CheckpointState, ExtractionSummary, Extractor, SnapshotWriter};
pub use ledger::{
    build_genesis_entries, AuditRecord, AuditStore, LedgerEntry, LedgerStore, StageError,
    SupplyRecord,
};
pub use rpc::{AccountPage, HttpRpcClient, RangeQuery, RpcError};
pub use staging::{Stager, StagingResult};
pub use validator::{load_and_filter, AccountBalance, ValidatedSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
