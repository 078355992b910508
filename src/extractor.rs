// 📥 Genesis Extractor - resumable, checkpointed walk of the genesis state trie
// Durability contract, never reordered:
//   1. append page rows to the snapshot CSV
//   2. flush + fsync
//   3. overwrite the checkpoint with the next cursor
// A crash between 2 and 3 re-fetches at most the last page on resume; the
// validator collapses the duplicate rows.

use crate::config::ChainConfig;
use crate::rpc::RangeQuery;
use anyhow::{bail, Context, Result};
use log::info;
use primitive_types::U256;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Checkpoint value written once the trie walk has finished
const DONE_SENTINEL: &str = "done";

/// Running-total progress line every this many accounts
const PROGRESS_EVERY: usize = 1000;

// ============================================================================
// CHECKPOINT
// ============================================================================

/// What the checkpoint file says about a prior run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointState {
    /// No checkpoint: start at the empty cursor and write the header
    Fresh,
    /// Resume from this cursor
    Resume(String),
    /// A prior run walked the whole trie; nothing left to do
    Complete,
}

/// Single-value cursor file, the sole resume state for the extractor
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: &Path) -> Self {
        Checkpoint {
            path: path.to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<CheckpointState> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let cursor = contents.trim().to_string();
                if cursor.is_empty() {
                    Ok(CheckpointState::Fresh)
                } else if cursor == DONE_SENTINEL {
                    Ok(CheckpointState::Complete)
                } else {
                    Ok(CheckpointState::Resume(cursor))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointState::Fresh),
            Err(e) => Err(e).context(format!("failed to read checkpoint {}", self.path.display())),
        }
    }

    /// Overwrite the checkpoint atomically (tmp file, fsync, rename)
    pub fn advance(&self, cursor: &str) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)
                .context(format!("failed to create {}", tmp.display()))?;
            use std::io::Write;
            file.write_all(cursor.as_bytes())?;
            file.sync_data()?;
        }
        fs::rename(&tmp, &self.path)
            .context(format!("failed to replace checkpoint {}", self.path.display()))?;
        Ok(())
    }

    pub fn mark_complete(&self) -> Result<()> {
        self.advance(DONE_SENTINEL)
    }
}

// ============================================================================
// SNAPSHOT WRITER
// ============================================================================

/// Append-only `address,balance_wei` CSV with per-page fsync
pub struct SnapshotWriter {
    writer: csv::Writer<File>,
    // cloned handle so we can fsync what the csv writer flushed
    sync_handle: File,
}

impl SnapshotWriter {
    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(format!("failed to open snapshot {}", path.display()))?;
        let sync_handle = file.try_clone()?;

        Ok(SnapshotWriter {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file),
            sync_handle,
        })
    }

    /// Written only when starting from an empty cursor
    pub fn write_header(&mut self) -> Result<()> {
        self.writer.write_record(["address", "balance_wei"])?;
        self.flush_durable()
    }

    /// Append one page of rows, then flush and fsync before the caller
    /// is allowed to touch the checkpoint.
    pub fn append_page(&mut self, accounts: &[(String, U256)]) -> Result<usize> {
        for (address, balance) in accounts {
            self.writer
                .write_record([address.as_str(), &balance.to_string()])?;
        }
        self.flush_durable()?;
        Ok(accounts.len())
    }

    fn flush_durable(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.sync_handle.sync_data()?;
        Ok(())
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    pub pages: usize,
    pub accounts: usize,
    pub total_wei: U256,
    pub resumed: bool,
    /// True when a prior run already finished and this run did nothing
    pub already_complete: bool,
}

pub struct Extractor<'a> {
    config: &'a ChainConfig,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a ChainConfig) -> Self {
        Extractor { config }
    }

    pub fn run<C: RangeQuery>(&self, client: &C) -> Result<ExtractionSummary> {
        let checkpoint = Checkpoint::new(&self.config.checkpoint_path);

        let mut summary = ExtractionSummary {
            pages: 0,
            accounts: 0,
            total_wei: U256::zero(),
            resumed: false,
            already_complete: false,
        };

        let mut cursor = match checkpoint.load()? {
            CheckpointState::Complete => {
                info!("extraction already complete, nothing to do");
                summary.already_complete = true;
                return Ok(summary);
            }
            CheckpointState::Resume(cursor) => {
                info!("resuming from checkpoint: {}", cursor);
                summary.resumed = true;
                cursor
            }
            CheckpointState::Fresh => String::new(),
        };

        let mut writer = SnapshotWriter::open_append(&self.config.snapshot_path)?;
        if !summary.resumed {
            writer.write_header()?;
        }

        let started = Instant::now();
        let mut last_progress = 0;

        loop {
            info!("requesting page from cursor {:?}", cursor);
            let page = client.fetch_page(&cursor, self.config.page_size)?;

            let appended = writer.append_page(&page.accounts)?;
            summary.pages += 1;
            summary.accounts += appended;
            for (_, balance) in &page.accounts {
                summary.total_wei = match summary.total_wei.checked_add(*balance) {
                    Some(total) => total,
                    None => bail!("running wei total overflowed 256 bits"),
                };
            }

            if summary.accounts - last_progress >= PROGRESS_EVERY {
                last_progress = summary.accounts;
                info!(
                    "… {} accounts in {:.1}s, wei={}",
                    summary.accounts,
                    started.elapsed().as_secs_f64(),
                    summary.total_wei
                );
            }

            // Checkpoint moves only after the page above is durable.
            match page.next {
                Some(next) => {
                    checkpoint.advance(&next)?;
                    cursor = next;
                }
                None => {
                    info!("reached end of trie");
                    checkpoint.mark_complete()?;
                    break;
                }
            }
        }

        Ok(summary)
    }
}
