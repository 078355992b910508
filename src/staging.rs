// ⚖️ Genesis Stager - integrity-gated, all-or-nothing staging
// Ordering is the whole point:
//   1. build ledger rows and sum them
//   2. integrity gate against the expected genesis supply (no writes yet)
//   3. pre-flight idempotency check on the audit store
//   4. ledger append, then audit + supply in one scoped transaction

use crate::config::{ChainConfig, GENESIS_TX_HASH};
use crate::ledger::{
    build_genesis_entries, AuditRecord, AuditStore, LedgerStore, StageError, SupplyRecord,
};
use crate::validator::ValidatedSet;
use chrono::Utc;
use log::info;
use primitive_types::U256;

/// Genesis allocations land in block 0
const GENESIS_BLOCK: i64 = 0;

#[derive(Debug, Clone)]
pub struct StagingResult {
    pub accounts: usize,
    pub total_wei: U256,
    pub entries_written: usize,
}

pub struct Stager<'a> {
    config: &'a ChainConfig,
}

impl<'a> Stager<'a> {
    pub fn new(config: &'a ChainConfig) -> Self {
        Stager { config }
    }

    pub fn stage<L, A>(
        &self,
        set: &ValidatedSet,
        ledger: &mut L,
        audit: &mut A,
    ) -> Result<StagingResult, StageError>
    where
        L: LedgerStore,
        A: AuditStore,
    {
        let entries = build_genesis_entries(self.config, &set.balances);

        // Integrity gate: strictly before any write to either store.
        let total = set.total_wei().ok_or(StageError::Overflow)?;
        if total != self.config.expected_supply {
            return Err(StageError::SupplyMismatch {
                expected: self.config.expected_supply,
                actual: total,
            });
        }
        info!("verified genesis supply: {} wei over {} accounts", total, entries.len());

        // The two stores share no transaction; refusing up front when the
        // audit row exists keeps a re-run from double-appending the ledger.
        if audit.is_block_staged(GENESIS_BLOCK)? {
            return Err(StageError::AlreadyStaged(GENESIS_BLOCK));
        }

        let entries_written = ledger.append_entries(&entries)?;

        let audit_record = AuditRecord {
            block_number: GENESIS_BLOCK,
            block_ts: self.config.genesis_timestamp,
            expected_delta: total.to_string(),
            actual_delta: total.to_string(),
            variance: "0".to_string(),
            within_margin: true,
            balanced: true,
            posted: true,
            checked_at: Utc::now(),
            chain_hash: GENESIS_TX_HASH.to_string(),
        };
        let supply_record = SupplyRecord {
            block_number: GENESIS_BLOCK,
            block_ts: self.config.genesis_timestamp,
            issuance_wei: total.to_string(),
            burn_wei: "0".to_string(),
            tips_wei: "0".to_string(),
            withdrawals_wei: "0".to_string(),
            net_delta_wei: total.to_string(),
            tx_count: entries.len() as i64,
        };
        audit.commit_block(&audit_record, &supply_record)?;

        Ok(StagingResult {
            accounts: set.balances.len(),
            total_wei: total,
            entries_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZERO_ADDRESS;
    use crate::db::{SqliteAuditStore, SqliteLedgerStore};
    use crate::ledger::LedgerEntry;
    use crate::validator::AccountBalance;

    // ------------------------------------------------------------------
    // In-memory fakes counting every store call
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryLedger {
        entries: Vec<LedgerEntry>,
        calls: usize,
    }

    impl LedgerStore for MemoryLedger {
        fn append_entries(&mut self, entries: &[LedgerEntry]) -> Result<usize, StageError> {
            self.calls += 1;
            self.entries.extend_from_slice(entries);
            Ok(entries.len())
        }
    }

    #[derive(Default)]
    struct MemoryAudit {
        committed: Vec<(AuditRecord, SupplyRecord)>,
        write_calls: usize,
    }

    impl AuditStore for MemoryAudit {
        fn is_block_staged(&self, block_number: i64) -> Result<bool, StageError> {
            Ok(self
                .committed
                .iter()
                .any(|(a, _)| a.block_number == block_number))
        }

        fn commit_block(
            &mut self,
            audit: &AuditRecord,
            supply: &SupplyRecord,
        ) -> Result<(), StageError> {
            self.write_calls += 1;
            self.committed.push((audit.clone(), supply.clone()));
            Ok(())
        }
    }

    fn test_config() -> ChainConfig {
        let mut config = ChainConfig::mainnet();
        config.expected_supply = U256::from(1000u64);
        config
    }

    fn fixture_set() -> ValidatedSet {
        ValidatedSet {
            balances: vec![
                AccountBalance {
                    address: format!("0x{}", "a".repeat(40)),
                    balance: U256::from(100u64),
                },
                AccountBalance {
                    address: format!("0x{}", "b".repeat(40)),
                    balance: U256::from(250u64),
                },
                AccountBalance {
                    address: format!("0x{}", "c".repeat(40)),
                    balance: U256::from(650u64),
                },
            ],
            skipped: 0,
            duplicates: 0,
        }
    }

    #[test]
    fn test_supply_mismatch_produces_zero_store_calls() {
        let mut config = test_config();
        config.expected_supply = U256::from(999u64); // fixture sums to 1000

        let mut ledger = MemoryLedger::default();
        let mut audit = MemoryAudit::default();

        let err = Stager::new(&config)
            .stage(&fixture_set(), &mut ledger, &mut audit)
            .unwrap_err();

        match err {
            StageError::SupplyMismatch { expected, actual } => {
                assert_eq!(expected, U256::from(999u64));
                assert_eq!(actual, U256::from(1000u64));
            }
            other => panic!("expected supply mismatch, got {:?}", other),
        }
        assert_eq!(ledger.calls, 0, "mismatch must write nothing to the ledger");
        assert_eq!(audit.write_calls, 0, "mismatch must write nothing to audit");
    }

    #[test]
    fn test_matching_supply_stages_everything() {
        let config = test_config();
        let mut ledger = MemoryLedger::default();
        let mut audit = MemoryAudit::default();

        let result = Stager::new(&config)
            .stage(&fixture_set(), &mut ledger, &mut audit)
            .unwrap();

        assert_eq!(result.accounts, 3);
        assert_eq!(result.total_wei, U256::from(1000u64));
        assert_eq!(result.entries_written, 3);

        assert_eq!(ledger.entries.len(), 3);
        for entry in &ledger.entries {
            assert_eq!(entry.tx_type, "alloc");
            assert_eq!(entry.from_address, ZERO_ADDRESS);
        }

        let (audit_record, supply_record) = &audit.committed[0];
        assert_eq!(audit_record.variance, "0");
        assert!(audit_record.balanced);
        assert_eq!(supply_record.issuance_wei, "1000");
        assert_eq!(supply_record.tx_count, 3);
    }

    #[test]
    fn test_preflight_check_refuses_staged_block() {
        let config = test_config();
        let mut ledger = MemoryLedger::default();
        let mut audit = MemoryAudit::default();

        let stager = Stager::new(&config);
        stager.stage(&fixture_set(), &mut ledger, &mut audit).unwrap();

        let err = stager
            .stage(&fixture_set(), &mut ledger, &mut audit)
            .unwrap_err();
        assert!(matches!(err, StageError::AlreadyStaged(0)));
        // the pre-flight fires before the ledger is touched a second time
        assert_eq!(ledger.calls, 1);
    }

    // ------------------------------------------------------------------
    // End-to-end against the SQLite stores
    // ------------------------------------------------------------------

    #[test]
    fn test_end_to_end_genesis_staging() {
        let config = test_config();
        let mut ledger = SqliteLedgerStore::open_in_memory().unwrap();
        let mut audit = SqliteAuditStore::open_in_memory().unwrap();

        let result = Stager::new(&config)
            .stage(&fixture_set(), &mut ledger, &mut audit)
            .unwrap();

        assert_eq!(result.entries_written, 3);
        assert_eq!(ledger.verify_count().unwrap(), 3);

        let audit_row = audit.get_audit(0).unwrap().unwrap();
        assert_eq!(audit_row.expected_delta, "1000");
        assert_eq!(audit_row.actual_delta, "1000");
        assert_eq!(audit_row.variance, "0");
        assert!(audit_row.balanced);

        let supply_row = audit.get_supply(0).unwrap().unwrap();
        assert_eq!(supply_row.issuance_wei, "1000");
        assert_eq!(supply_row.burn_wei, "0");
        assert_eq!(supply_row.tx_count, 3);
    }

    #[test]
    fn test_rerun_against_constrained_stores_conflicts() {
        let config = test_config();
        let mut ledger = SqliteLedgerStore::open_in_memory().unwrap();
        let mut audit = SqliteAuditStore::open_in_memory().unwrap();

        let stager = Stager::new(&config);
        stager.stage(&fixture_set(), &mut ledger, &mut audit).unwrap();

        let err = stager
            .stage(&fixture_set(), &mut ledger, &mut audit)
            .unwrap_err();

        assert!(matches!(err, StageError::AlreadyStaged(0)));
        assert_eq!(ledger.verify_count().unwrap(), 3, "rows not duplicated");
    }

    #[test]
    fn test_ledger_constraint_backstops_missing_audit_row() {
        // crash window: ledger committed, audit/supply did not. The ledger's
        // own uniqueness constraint still refuses the second append.
        let config = test_config();
        let mut ledger = SqliteLedgerStore::open_in_memory().unwrap();
        let mut broken_audit = MemoryAudit::default();

        let entries = build_genesis_entries(&config, &fixture_set().balances);
        ledger.append_entries(&entries).unwrap();

        let err = Stager::new(&config)
            .stage(&fixture_set(), &mut ledger, &mut broken_audit)
            .unwrap_err();

        assert!(matches!(err, StageError::AlreadyStaged(0)));
        assert_eq!(ledger.verify_count().unwrap(), 3);
        assert_eq!(broken_audit.write_calls, 0);
    }
}
