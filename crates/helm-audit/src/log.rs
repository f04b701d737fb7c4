//! The append-only, hash-chained audit log (spec.md §4.F).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use helm_errors::HelmError;
use parking_lot::Mutex;
use serde::Serialize;

use crate::record::{AuditOutcome, AuditRecord, ContentHash};

/// Which format [`AuditLog::export`] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// A JSON array of records.
    Json,
    /// CSV with one row per record.
    Csv,
}

/// Where `verify()` found the chain broken, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBreak {
    /// The index of the first record whose hash doesn't match.
    pub broken_at: u64,
}

struct LogState {
    records: Vec<AuditRecord>,
    file: Option<File>,
}

/// An append-only audit log. Every append is strictly serialized; `verify`
/// and `export` take a consistent snapshot under the same lock.
pub struct AuditLog {
    state: Mutex<LogState>,
}

impl AuditLog {
    /// An in-memory-only log (no durable backing file).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LogState {
                records: Vec::new(),
                file: None,
            }),
        }
    }

    /// A log backed by an append-only file at `path`. Existing records, if
    /// any, are read back in first.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HelmError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let records = if path.exists() {
            read_all(&path).map_err(|e| HelmError::Internal(format!("failed to read audit log: {e}")))?
        } else {
            Vec::new()
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HelmError::Internal(format!("failed to open audit log: {e}")))?;
        Ok(Self {
            state: Mutex::new(LogState {
                records,
                file: Some(file),
            }),
        })
    }

    /// Append a new record, assigning it the next sequence number and
    /// chaining it to the current head.
    pub fn append(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Result<AuditRecord, HelmError> {
        let mut state = self.state.lock();
        let seq = state.records.len() as u64;
        let prev_hash = state.records.last().map_or(ContentHash::ZERO, |r| r.this_hash);
        let record = AuditRecord::new(seq, actor, action, resource, outcome, prev_hash);

        if let Some(file) = state.file.as_mut() {
            write_framed(file, &record)
                .map_err(|e| HelmError::Internal(format!("failed to persist audit record: {e}")))?;
        }
        state.records.push(record.clone());
        Ok(record)
    }

    /// Number of records in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of all records.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.state.lock().records.clone()
    }

    /// Recompute every hash in the chain and report the first break, if
    /// any (spec.md §8 invariant 7, scenario S4).
    #[must_use]
    pub fn verify(&self) -> Option<ChainBreak> {
        let state = self.state.lock();
        let mut expected_prev = ContentHash::ZERO;
        for record in &state.records {
            if record.prev_hash != expected_prev || record.recompute_hash() != record.this_hash {
                return Some(ChainBreak {
                    broken_at: record.seq,
                });
            }
            expected_prev = record.this_hash;
        }
        None
    }

    /// Write every record to `path` in the given format.
    pub fn export(&self, path: impl AsRef<Path>, format: ExportFormat) -> Result<(), HelmError> {
        let records = self.records();
        match format {
            ExportFormat::Json => {
                let file = File::create(path)
                    .map_err(|e| HelmError::Internal(format!("failed to create export file: {e}")))?;
                serde_json::to_writer_pretty(file, &records)
                    .map_err(|e| HelmError::Internal(format!("failed to write json export: {e}")))?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)
                    .map_err(|e| HelmError::Internal(format!("failed to create export file: {e}")))?;
                for record in &records {
                    writer
                        .serialize(CsvRow::from(record))
                        .map_err(|e| HelmError::Internal(format!("failed to write csv row: {e}")))?;
                }
                writer
                    .flush()
                    .map_err(|e| HelmError::Internal(format!("failed to flush csv export: {e}")))?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CsvRow {
    seq: u64,
    ts: String,
    actor: String,
    action: String,
    resource: String,
    outcome: String,
    prev_hash: String,
    this_hash: String,
}

impl From<&AuditRecord> for CsvRow {
    fn from(record: &AuditRecord) -> Self {
        let outcome = match &record.outcome {
            AuditOutcome::Success { details } => {
                format!("success{}", details.as_deref().map(|d| format!(": {d}")).unwrap_or_default())
            }
            AuditOutcome::Failure { error } => format!("failure: {error}"),
        };
        Self {
            seq: record.seq,
            ts: record.ts.to_string(),
            actor: record.actor.clone(),
            action: record.action.clone(),
            resource: record.resource.clone(),
            outcome,
            prev_hash: record.prev_hash.to_hex(),
            this_hash: record.this_hash.to_hex(),
        }
    }
}

fn write_framed(file: &mut File, record: &AuditRecord) -> io::Result<()> {
    let bytes = serde_json::to_vec(record)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(())
}

fn read_all(path: &Path) -> io::Result<Vec<AuditRecord>> {
    let mut file = File::open(path)?;
    let mut records = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        if file.read_exact(&mut body).is_err() {
            tracing::warn!("truncating audit log at last complete record");
            break;
        }
        match serde_json::from_slice(&body) {
            Ok(record) => records.push(record),
            Err(_) => {
                tracing::warn!("truncating audit log at last complete record");
                break;
            }
        }
    }
    Ok(records)
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_links_correctly() {
        let log = AuditLog::in_memory();
        log.append("user", "login", "session", AuditOutcome::success()).unwrap();
        log.append("user", "query", "db", AuditOutcome::success()).unwrap();
        let records = log.records();
        assert_eq!(records[1].prev_hash, records[0].this_hash);
        assert!(log.verify().is_none());
    }

    #[test]
    fn s4_tamper_detection() {
        let log = AuditLog::in_memory();
        for i in 0..5 {
            log.append("user", format!("action{i}"), "res", AuditOutcome::success())
                .unwrap();
        }
        {
            let mut state = log.state.lock();
            state.records[3].action = "tampered".to_string();
        }
        let broken = log.verify();
        assert_eq!(broken, Some(ChainBreak { broken_at: 3 }));
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        {
            let log = AuditLog::open(&path).unwrap();
            log.append("user", "login", "session", AuditOutcome::success()).unwrap();
            log.append("user", "logout", "session", AuditOutcome::success()).unwrap();
        }
        let reopened = AuditLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.verify().is_none());
    }

    #[test]
    fn export_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::in_memory();
        log.append("user", "login", "session", AuditOutcome::success()).unwrap();

        let json_path = dir.path().join("out.json");
        log.export(&json_path, ExportFormat::Json).unwrap();
        assert!(json_path.exists());

        let csv_path = dir.path().join("out.csv");
        log.export(&csv_path, ExportFormat::Csv).unwrap();
        assert!(csv_path.exists());
    }
}
