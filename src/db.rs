// 🗄️ SQLite Stores - ledger append + audit/supply transaction
// Two independent resources, as in production: the partitioned ledger store
// and the audit/supply store each own their connection. Idempotency is
// enforced by uniqueness constraints; violations surface as AlreadyStaged.

use crate::ledger::{AuditRecord, AuditStore, LedgerEntry, LedgerStore, StageError, SupplyRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// LEDGER STORE
// ============================================================================

/// Append-only ledger table partitioned by (year, month)
pub struct SqliteLedgerStore {
    conn: Connection,
}

impl SqliteLedgerStore {
    pub fn open(path: &Path) -> Result<Self, StageError> {
        let conn = Connection::open(path).map_err(|e| StageError::Ledger(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StageError> {
        let conn = Connection::open_in_memory().map_err(|e| StageError::Ledger(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StageError> {
        setup_ledger_schema(&conn).map_err(|e| StageError::Ledger(e.to_string()))?;
        Ok(SqliteLedgerStore { conn })
    }

    pub fn verify_count(&self) -> Result<i64, StageError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))
            .map_err(|e| StageError::Ledger(e.to_string()))
    }
}

fn setup_ledger_schema(conn: &Connection) -> rusqlite::Result<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            block_number INTEGER NOT NULL,
            block_ts TEXT NOT NULL,
            tx_hash TEXT NOT NULL,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            amount_wei TEXT NOT NULL,
            token_id INTEGER NOT NULL,
            tx_type TEXT NOT NULL,
            tx_subtype TEXT NOT NULL,
            success INTEGER NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_partition ON ledger_entries(year, month)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_block ON ledger_entries(block_number)",
        [],
    )?;

    Ok(())
}

impl LedgerStore for SqliteLedgerStore {
    /// Append the whole batch in one transaction. Any idempotency-key
    /// conflict rolls the batch back and reports the block as staged.
    fn append_entries(&mut self, entries: &[LedgerEntry]) -> Result<usize, StageError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StageError::Ledger(e.to_string()))?;

        for entry in entries {
            let result = tx.execute(
                "INSERT INTO ledger_entries (
                    idempotency_hash, block_number, block_ts, tx_hash,
                    from_address, to_address, amount_wei, token_id,
                    tx_type, tx_subtype, success, year, month
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    entry.idempotency_hash(),
                    entry.block_number,
                    entry.block_ts.to_rfc3339(),
                    entry.tx_hash,
                    entry.from_address,
                    entry.to_address,
                    entry.amount_wei,
                    entry.token_id,
                    entry.tx_type,
                    entry.tx_subtype,
                    entry.success,
                    entry.year,
                    entry.month,
                ],
            );

            match result {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(StageError::AlreadyStaged(entry.block_number));
                }
                Err(e) => return Err(StageError::Ledger(e.to_string())),
            }
        }

        let written = entries.len();
        tx.commit().map_err(|e| StageError::Ledger(e.to_string()))?;
        Ok(written)
    }
}

// ============================================================================
// AUDIT / SUPPLY STORE
// ============================================================================

/// Block-level audit + supply tables, written pairwise in one transaction
pub struct SqliteAuditStore {
    conn: Connection,
}

impl SqliteAuditStore {
    pub fn open(path: &Path) -> Result<Self, StageError> {
        let conn = Connection::open(path).map_err(|e| StageError::Audit(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StageError> {
        let conn = Connection::open_in_memory().map_err(|e| StageError::Audit(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StageError> {
        setup_audit_schema(&conn).map_err(|e| StageError::Audit(e.to_string()))?;
        Ok(SqliteAuditStore { conn })
    }

    pub fn get_audit(&self, block_number: i64) -> Result<Option<AuditRecord>, StageError> {
        let result = self.conn.query_row(
            "SELECT block_number, block_ts, expected_delta, actual_delta, variance,
                    within_margin, balanced, posted, checked_at, chain_hash
             FROM block_audit WHERE block_number = ?1",
            params![block_number],
            |row| {
                Ok(AuditRecord {
                    block_number: row.get(0)?,
                    block_ts: parse_ts(row.get::<_, String>(1)?)?,
                    expected_delta: row.get(2)?,
                    actual_delta: row.get(3)?,
                    variance: row.get(4)?,
                    within_margin: row.get(5)?,
                    balanced: row.get(6)?,
                    posted: row.get(7)?,
                    checked_at: parse_ts(row.get::<_, String>(8)?)?,
                    chain_hash: row.get(9)?,
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StageError::Audit(e.to_string())),
        }
    }

    pub fn get_supply(&self, block_number: i64) -> Result<Option<SupplyRecord>, StageError> {
        let result = self.conn.query_row(
            "SELECT block_number, block_ts, issuance_wei, burn_wei, tips_wei,
                    withdrawals_wei, net_delta_wei, tx_count
             FROM block_supply WHERE block_number = ?1",
            params![block_number],
            |row| {
                Ok(SupplyRecord {
                    block_number: row.get(0)?,
                    block_ts: parse_ts(row.get::<_, String>(1)?)?,
                    issuance_wei: row.get(2)?,
                    burn_wei: row.get(3)?,
                    tips_wei: row.get(4)?,
                    withdrawals_wei: row.get(5)?,
                    net_delta_wei: row.get(6)?,
                    tx_count: row.get(7)?,
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StageError::Audit(e.to_string())),
        }
    }
}

fn parse_ts(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}

fn setup_audit_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // block_number PRIMARY KEY is the uniqueness constraint that makes
    // staging re-runnable
    conn.execute(
        "CREATE TABLE IF NOT EXISTS block_audit (
            block_number INTEGER PRIMARY KEY,
            block_ts TEXT NOT NULL,
            expected_delta TEXT NOT NULL,
            actual_delta TEXT NOT NULL,
            variance TEXT NOT NULL,
            within_margin INTEGER NOT NULL,
            balanced INTEGER NOT NULL,
            posted INTEGER NOT NULL,
            checked_at TEXT NOT NULL,
            chain_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS block_supply (
            block_number INTEGER PRIMARY KEY,
            block_ts TEXT NOT NULL,
            issuance_wei TEXT NOT NULL,
            burn_wei TEXT NOT NULL,
            tips_wei TEXT NOT NULL,
            withdrawals_wei TEXT NOT NULL,
            net_delta_wei TEXT NOT NULL,
            tx_count INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

impl AuditStore for SqliteAuditStore {
    fn is_block_staged(&self, block_number: i64) -> Result<bool, StageError> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM block_audit WHERE block_number = ?1)",
                params![block_number],
                |row| row.get(0),
            )
            .map_err(|e| StageError::Audit(e.to_string()))
    }

    /// Both rows or neither: a single scoped transaction
    fn commit_block(
        &mut self,
        audit: &AuditRecord,
        supply: &SupplyRecord,
    ) -> Result<(), StageError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StageError::Audit(e.to_string()))?;

        let audit_result = tx.execute(
            "INSERT INTO block_audit (
                block_number, block_ts, expected_delta, actual_delta, variance,
                within_margin, balanced, posted, checked_at, chain_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                audit.block_number,
                audit.block_ts.to_rfc3339(),
                audit.expected_delta,
                audit.actual_delta,
                audit.variance,
                audit.within_margin,
                audit.balanced,
                audit.posted,
                audit.checked_at.to_rfc3339(),
                audit.chain_hash,
            ],
        );
        map_commit_result(audit_result, audit.block_number)?;

        let supply_result = tx.execute(
            "INSERT INTO block_supply (
                block_number, block_ts, issuance_wei, burn_wei, tips_wei,
                withdrawals_wei, net_delta_wei, tx_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                supply.block_number,
                supply.block_ts.to_rfc3339(),
                supply.issuance_wei,
                supply.burn_wei,
                supply.tips_wei,
                supply.withdrawals_wei,
                supply.net_delta_wei,
                supply.tx_count,
            ],
        );
        map_commit_result(supply_result, supply.block_number)?;

        tx.commit().map_err(|e| StageError::Audit(e.to_string()))
    }
}

fn map_commit_result(
    result: rusqlite::Result<usize>,
    block_number: i64,
) -> Result<(), StageError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(StageError::AlreadyStaged(block_number)),
        Err(e) => Err(StageError::Audit(e.to_string())),
    }
}
