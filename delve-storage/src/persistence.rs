//! JSON-lines persistence for the memory store.
//!
//! One record per line, tagged by kind. Learnings are written before votes
//! so a file always loads in dependency order.

use crate::memory::MemoryStore;
use delve_core::{DelveError, DelveResult, HistoryEntry, Learning, StorageError, Vote};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum MemoryRecord {
    History(HistoryEntry),
    Learning(Learning),
    Vote(Vote),
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> DelveError {
    DelveError::Storage(StorageError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}

impl MemoryStore {
    /// Load a store from `path`. A missing file yields an empty store.
    ///
    /// # Errors
    /// `StorageError::Io` if the file cannot be read and
    /// `StorageError::CorruptRecord` for a line that does not parse.
    pub fn load(path: &Path) -> DelveResult<Self> {
        let store = Self::new();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No memory file, starting empty");
            return Ok(store);
        }

        let source = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        for (index, line) in source.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: MemoryRecord = serde_json::from_str(line).map_err(|e| {
                DelveError::Storage(StorageError::CorruptRecord {
                    path: path.display().to_string(),
                    line: index + 1,
                    reason: e.to_string(),
                })
            })?;
            match record {
                MemoryRecord::History(entry) => store.history_append(entry)?,
                MemoryRecord::Learning(learning) => {
                    store.learning_insert(learning)?;
                }
                MemoryRecord::Vote(vote) => store.vote_restore(vote)?,
            }
        }

        tracing::info!(
            path = %path.display(),
            learnings = store.learning_count()?,
            history = store.history_count()?,
            votes = store.vote_count()?,
            "Loaded memory store"
        );
        Ok(store)
    }

    /// Every record, in the order `load` expects.
    pub fn records(&self) -> DelveResult<Vec<MemoryRecord>> {
        let mut records = Vec::new();
        for mut learning in self.learnings()? {
            learning.votes = 0;
            records.push(MemoryRecord::Learning(learning));
        }
        records.extend(self.votes()?.into_iter().map(MemoryRecord::Vote));
        records.extend(self.history()?.into_iter().map(MemoryRecord::History));
        Ok(records)
    }

    /// Rewrite `path` with the full store. Returns the number of records.
    ///
    /// Writes to a sibling temporary file first and renames it into place.
    pub fn flush(&self, path: &Path) -> DelveResult<usize> {
        let records = self.records()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let tmp = path.with_extension("jsonl.tmp");
        {
            let file = fs::File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            for record in &records {
                let line = serde_json::to_string(record).map_err(|e| io_error(&tmp, e))?;
                writeln!(writer, "{}", line).map_err(|e| io_error(&tmp, e))?;
            }
            writer.flush().map_err(|e| io_error(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;

        tracing::info!(path = %path.display(), records = records.len(), "Flushed memory store");
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::HistoryRole;

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("absent.jsonl")).unwrap();
        assert_eq!(store.learning_count().unwrap(), 0);
    }

    #[test]
    fn test_flush_then_load_preserves_votes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.jsonl");

        let store = MemoryStore::new();
        let learning = store.learn("Rent is on page 2", "lease").unwrap();
        store.vote(learning.id).unwrap();
        store.remember(HistoryRole::User, "What is the rent?").unwrap();
        assert_eq!(store.flush(&path).unwrap(), 3);

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.learning_get(learning.id).unwrap().unwrap().votes, 1);
        assert_eq!(loaded.history().unwrap()[0].content, "What is the rent?");
    }

    #[test]
    fn test_corrupt_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.jsonl");
        let store = MemoryStore::new();
        store.learn("ok", "ctx").unwrap();
        store.flush(&path).unwrap();
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("{not json}\n");
        fs::write(&path, contents).unwrap();

        match MemoryStore::load(&path) {
            Err(DelveError::Storage(StorageError::CorruptRecord { line, .. })) => assert_eq!(line, 2),
            other => panic!("expected corrupt record, got {:?}", other),
        }
    }

    #[test]
    fn test_record_tagging() {
        let record = MemoryRecord::History(HistoryEntry::new(HistoryRole::Note, "n"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record"], "history");
        assert_eq!(json["role"], "note");
    }
}
