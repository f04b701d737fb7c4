//! Durable persistence: length-prefixed entries behind a small header
//! (spec.md §6.4).

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;

use helm_core::Timestamp;
use helm_errors::HelmError;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entry::StateEntry;
use crate::store::StateStore;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct FileHeader {
    schema_version: u32,
    created_at: Timestamp,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    entry: StateEntry,
}

impl StateStore {
    /// Serialize all live entries to `path`: a header followed by a
    /// length-prefixed sequence of entries.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HelmError> {
        let header = FileHeader {
            schema_version: SCHEMA_VERSION,
            created_at: Timestamp::now(),
        };
        let mut file = std::fs::File::create(path.as_ref())
            .map_err(|e| HelmError::Internal(format!("failed to create state file: {e}")))?;
        write_framed(&mut file, &header)
            .map_err(|e| HelmError::Internal(format!("failed to write state header: {e}")))?;

        let entries = self.entries.read();
        for (key, entry) in entries.iter() {
            let record = PersistedEntry {
                key: key.clone(),
                entry: entry.clone(),
            };
            write_framed(&mut file, &record)
                .map_err(|e| HelmError::Internal(format!("failed to write state entry: {e}")))?;
        }
        Ok(())
    }

    /// Load entries from `path`, replacing this store's current contents.
    /// Tolerates trailing garbage (a partially-written final record) by
    /// truncating to the last complete entry and logging a warning.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(), HelmError> {
        let mut file = std::fs::File::open(path.as_ref())
            .map_err(|e| HelmError::Internal(format!("failed to open state file: {e}")))?;

        let _header: FileHeader = read_framed(&mut file)
            .map_err(|e| HelmError::Internal(format!("failed to read state header: {e}")))?
            .ok_or_else(|| HelmError::Internal("state file has no header".into()))?;

        let mut loaded = HashMap::new();
        loop {
            match read_framed::<PersistedEntry>(&mut file) {
                Ok(Some(record)) => {
                    loaded.insert(record.key, record.entry);
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "truncating state file at last complete entry");
                    break;
                }
            }
        }

        *self.entries.write() = loaded;
        Ok(())
    }
}

fn write_framed<T: Serialize>(file: &mut std::fs::File, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(&bytes)?;
    Ok(())
}

/// Reads one length-prefixed record. Returns `Ok(None)` at a clean
/// end-of-file (no bytes at all) and an `Err` if a length prefix or record
/// body is truncated partway through, which callers treat as "stop here".
fn read_framed<T: for<'de> Deserialize<'de>>(file: &mut std::fs::File) -> io::Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match file.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    file.read_exact(&mut body)?;
    let value = serde_json::from_slice(&body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::SetOptions;
    use serde_json::json;
    use std::io::Write as _;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");

        let store = StateStore::new();
        store.set("a", json!(1), SetOptions::none());
        store.set("b", json!("hello"), SetOptions::none());
        store.save(&path).unwrap();

        let restored = StateStore::new();
        restored.load(&path).unwrap();
        assert_eq!(restored.get("a"), Some(json!(1)));
        assert_eq!(restored.get("b"), Some(json!("hello")));
    }

    #[test]
    fn trailing_garbage_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");

        let store = StateStore::new();
        store.set("a", json!(1), SetOptions::none());
        store.save(&path).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let restored = StateStore::new();
        restored.load(&path).unwrap();
        assert_eq!(restored.get("a"), Some(json!(1)));
    }
}
