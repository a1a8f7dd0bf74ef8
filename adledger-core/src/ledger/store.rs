//! Ledger persistence backends.
//!
//! - **File** (production): JSON Lines, one row per record snapshot. Each
//!   `persist` appends a row and syncs it to disk before returning; on load
//!   the last row for a record id wins. Compaction rewrites one row per record
//!   through a temp file and an atomic rename.
//! - **Memory** (tests, dry runs): nothing survives the process.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::record::LedgerRecord;
use crate::error::{AdLedgerError, Result};

/// Durable storage for ledger records.
///
/// `persist` must not return `Ok` until the row is durable.
pub trait LedgerBackend: Send {
    /// Load the current snapshot of every record.
    fn load(&mut self) -> Result<Vec<LedgerRecord>>;

    /// Durably store the latest snapshot of one record.
    fn persist(&mut self, record: &LedgerRecord) -> Result<()>;

    /// Rewrite storage so that it holds exactly `records`.
    fn compact(&mut self, _records: &[LedgerRecord]) -> Result<()> {
        Ok(())
    }

    /// `true` when the last load saw superseded or torn rows.
    fn needs_compaction(&self) -> bool {
        false
    }

    /// Whether data survives a restart.
    fn is_durable(&self) -> bool;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// JSON Lines ledger file.
pub struct FileBackend {
    path: PathBuf,
    file: File,
    stale_rows: usize,
    torn_tail: bool,
    /// Set when a failed append could not be rolled back; cleared by `compact`.
    poisoned: bool,
    read_only: bool,
}

impl FileBackend {
    /// Open (creating if needed) a ledger file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AdLedgerError::Persistence(format!(
                    "Failed to create ledger directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let file = open_append(&path)?;
        Ok(Self {
            path,
            file,
            stale_rows: 0,
            torn_tail: false,
            poisoned: false,
            read_only: false,
        })
    }

    /// Open an existing ledger file for reading. `persist` and `compact` fail.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            AdLedgerError::Persistence(format!("Failed to open ledger {}: {e}", path.display()))
        })?;
        Ok(Self {
            path,
            file,
            stale_rows: 0,
            torn_tail: false,
            poisoned: false,
            read_only: true,
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(AdLedgerError::Persistence(format!(
                "Ledger {} is open read-only",
                self.path.display()
            )));
        }
        if self.poisoned {
            return Err(AdLedgerError::Persistence(format!(
                "Ledger {} has an unrecoverable partial write; compact before appending",
                self.path.display()
            )));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the file up to its last complete row. A torn final row is
    /// truncated away so the next append starts on a fresh line.
    fn complete_len(&mut self) -> std::io::Result<u64> {
        let len = self.file.metadata()?.len();
        if len == 0 || self.byte_at(len - 1)? == b'\n' {
            return Ok(len);
        }

        let mut end = len;
        let mut chunk = [0u8; 4096];
        let keep = loop {
            if end == 0 {
                break 0;
            }
            let start = end.saturating_sub(chunk.len() as u64);
            let buf = &mut chunk[..(end - start) as usize];
            self.file.seek(SeekFrom::Start(start))?;
            self.file.read_exact(buf)?;
            if let Some(pos) = buf.iter().rposition(|b| *b == b'\n') {
                break start + pos as u64 + 1;
            }
            end = start;
        };

        warn!(
            path = %self.path.display(),
            dropped_bytes = len - keep,
            "Truncating torn ledger row before append"
        );
        self.file.set_len(keep)?;
        self.file.sync_data()?;
        Ok(keep)
    }

    fn byte_at(&mut self, offset: u64) -> std::io::Result<u8> {
        let mut byte = [0u8; 1];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            AdLedgerError::Persistence(format!("Failed to open ledger {}: {e}", path.display()))
        })
}

impl LedgerBackend for FileBackend {
    fn load(&mut self) -> Result<Vec<LedgerRecord>> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            AdLedgerError::Persistence(format!("Failed to read ledger {}: {e}", self.path.display()))
        })?;

        let lines: Vec<&str> = contents.lines().collect();
        let complete_tail = contents.is_empty() || contents.ends_with('\n');
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, LedgerRecord> = HashMap::new();
        let mut rows = 0usize;
        self.torn_tail = false;

        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LedgerRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) if idx + 1 == lines.len() && !complete_tail => {
                    // Unacknowledged partial append from a crash.
                    warn!(path = %self.path.display(), error = %e, "Ignoring torn final ledger row");
                    self.torn_tail = true;
                    continue;
                }
                Err(e) => {
                    return Err(AdLedgerError::Persistence(format!(
                        "Corrupt ledger row {} in {}: {e}",
                        idx + 1,
                        self.path.display()
                    )))
                }
            };
            rows += 1;
            if !latest.contains_key(&record.record_id) {
                order.push(record.record_id.clone());
            }
            latest.insert(record.record_id.clone(), record);
        }

        self.stale_rows = rows - latest.len();
        debug!(
            path = %self.path.display(),
            rows,
            records = latest.len(),
            stale_rows = self.stale_rows,
            "Loaded ledger file"
        );

        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }

    fn persist(&mut self, record: &LedgerRecord) -> Result<()> {
        self.ensure_writable()?;

        let mut row = serde_json::to_vec(record)
            .map_err(|e| AdLedgerError::Persistence(format!("Failed to serialize record: {e}")))?;
        row.push(b'\n');

        let start = self.complete_len().map_err(|e| {
            AdLedgerError::Persistence(format!(
                "Failed to inspect ledger {}: {e}",
                self.path.display()
            ))
        })?;

        let appended = self
            .file
            .write_all(&row)
            .and_then(|_| self.file.sync_data());
        if let Err(e) = appended {
            // Roll back so the row neither glues onto the next append nor
            // reappears on reload.
            if let Err(rollback) = self.file.set_len(start).and_then(|_| self.file.sync_data()) {
                error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Failed to roll back ledger append"
                );
                self.poisoned = true;
            }
            return Err(AdLedgerError::Persistence(format!(
                "Failed to append to ledger {}: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn compact(&mut self, records: &[LedgerRecord]) -> Result<()> {
        if self.read_only {
            return self.ensure_writable();
        }
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let fail = |what: &str, e: &dyn std::fmt::Display| {
            AdLedgerError::Persistence(format!(
                "Failed to {what} while compacting {}: {e}",
                self.path.display()
            ))
        };

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| fail("create temp file", &e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            for record in records {
                serde_json::to_writer(&mut writer, record).map_err(|e| fail("serialize", &e))?;
                writer.write_all(b"\n").map_err(|e| fail("write", &e))?;
            }
            writer.flush().map_err(|e| fail("flush", &e))?;
        }
        tmp.as_file_mut().sync_all().map_err(|e| fail("sync", &e))?;
        tmp.persist(&self.path).map_err(|e| fail("rename", &e))?;

        self.file = open_append(&self.path)?;
        info!(
            path = %self.path.display(),
            records = records.len(),
            dropped_rows = self.stale_rows,
            "Compacted ledger file"
        );
        self.stale_rows = 0;
        self.torn_tail = false;
        self.poisoned = false;
        Ok(())
    }

    fn needs_compaction(&self) -> bool {
        self.stale_rows > 0 || self.torn_tail
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Non-durable backend. Rows are kept only for the life of the process.
#[derive(Default)]
pub struct MemoryBackend {
    rows: Vec<LedgerRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        warn!("Using in-memory ledger storage - records will be lost on exit!");
        Self::default()
    }

    /// Seed the backend, e.g. with rows exported from another ledger.
    pub fn with_records(rows: Vec<LedgerRecord>) -> Self {
        Self { rows }
    }
}

impl LedgerBackend for MemoryBackend {
    fn load(&mut self) -> Result<Vec<LedgerRecord>> {
        Ok(self.rows.clone())
    }

    fn persist(&mut self, record: &LedgerRecord) -> Result<()> {
        match self.rows.iter_mut().find(|r| r.record_id == record.record_id) {
            Some(existing) => *existing = record.clone(),
            None => self.rows.push(record.clone()),
        }
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
