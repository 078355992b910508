// ✅ Snapshot Validator - load the extracted CSV into a clean balance set
// Malformed rows are skipped and counted, never fatal on their own; an empty
// set after filtering aborts before anything downstream can write.

use anyhow::{bail, Context, Result};
use log::warn;
use primitive_types::U256;
use std::collections::BTreeMap;
use std::path::Path;

// ============================================================================
// ACCOUNT BALANCE
// ============================================================================

/// One genesis allocation: canonical lowercase address + wei balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    pub address: String,
    pub balance: U256,
}

/// Outcome of loading and filtering a snapshot file
#[derive(Debug, Clone)]
pub struct ValidatedSet {
    /// Address-ordered, one entry per account
    pub balances: Vec<AccountBalance>,
    /// Rows rejected for empty/malformed address or non-integer balance
    pub skipped: usize,
    /// Rows collapsed because the address re-appeared with the same balance
    /// (the re-fetched-page boundary after a crash)
    pub duplicates: usize,
}

impl ValidatedSet {
    /// Sum of all balances; `None` if the total exceeds 256 bits
    pub fn total_wei(&self) -> Option<U256> {
        self.balances
            .iter()
            .try_fold(U256::zero(), |acc, b| acc.checked_add(b.balance))
    }
}

/// `0x` + 40 hex chars after lowercasing
fn is_well_formed_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Non-negative decimal integer string → U256
fn parse_balance(raw: &str) -> Option<U256> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    U256::from_dec_str(raw).ok()
}

// ============================================================================
// LOAD AND FILTER
// ============================================================================

/// Read a header-delimited snapshot into a validated balance set.
///
/// Fatal: missing file, header without `address`/`balance_wei`, an address
/// re-appearing with a *different* balance, or an empty set after filtering.
pub fn load_and_filter(path: &Path) -> Result<ValidatedSet> {
    if !path.exists() {
        bail!("snapshot file not found: {}", path.display());
    }

    let contents = std::fs::read_to_string(path)
        .context(format!("failed to open snapshot {}", path.display()))?;

    // The csv parser drops truly empty lines before we ever see them; count
    // them here so they land in `skipped` with the other malformed rows.
    // Whitespace-only lines still come through as records and are rejected
    // below like any bad row.
    let blank_lines = contents
        .lines()
        .skip(1)
        .filter(|line| line.is_empty())
        .count();

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(contents.as_bytes());

    let headers = reader.headers()?.clone();
    let address_idx = headers.iter().position(|h| h.trim() == "address");
    let balance_idx = headers.iter().position(|h| h.trim() == "balance_wei");
    let (address_idx, balance_idx) = match (address_idx, balance_idx) {
        (Some(a), Some(b)) => (a, b),
        _ => bail!(
            "snapshot header missing required columns, found: {:?}",
            headers.iter().collect::<Vec<_>>()
        ),
    };

    let mut by_address: BTreeMap<String, U256> = BTreeMap::new();
    let mut skipped = blank_lines;
    let mut duplicates = 0;

    for (line, record) in reader.records().enumerate() {
        let record = record.context("failed to read snapshot row")?;

        let address = record
            .get(address_idx)
            .unwrap_or("")
            .trim()
            .to_lowercase();
        let raw_balance = record.get(balance_idx).unwrap_or("").trim();

        if address.is_empty() || !is_well_formed_address(&address) {
            skipped += 1;
            continue;
        }
        let balance = match parse_balance(raw_balance) {
            Some(balance) => balance,
            None => {
                skipped += 1;
                continue;
            }
        };

        match by_address.get(&address) {
            // same address, same balance: a re-appended page, collapse it
            Some(existing) if *existing == balance => duplicates += 1,
            // same address, different balance: value-affecting ambiguity
            Some(existing) => bail!(
                "conflicting balances for {} at data line {}: {} vs {}",
                address,
                line + 2,
                existing,
                balance
            ),
            None => {
                by_address.insert(address, balance);
            }
        }
    }

    if skipped > 0 {
        warn!("skipped {} malformed row(s) in {}", skipped, path.display());
    }

    if by_address.is_empty() {
        bail!("no valid allocations found after filtering {}", path.display());
    }

    Ok(ValidatedSet {
        balances: by_address
            .into_iter()
            .map(|(address, balance)| AccountBalance { address, balance })
            .collect(),
        skipped,
        duplicates,
    })
}
