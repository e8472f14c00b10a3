//! Append-only trace of every model call made through an Environment.

use crate::memory::{read_lock, write_lock};
use delve_core::{DelveResult, EntityId, TraceEntry};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct TraceRecorder {
    entries: RwLock<Vec<TraceEntry>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its position in the log.
    pub fn append(&self, entry: TraceEntry) -> DelveResult<usize> {
        let mut entries = write_lock(&self.entries)?;
        entries.push(entry);
        Ok(entries.len() - 1)
    }

    pub fn entries(&self) -> DelveResult<Vec<TraceEntry>> {
        Ok(read_lock(&self.entries)?.clone())
    }

    /// Entries of one session, in append order.
    pub fn session(&self, session_id: EntityId) -> DelveResult<Vec<TraceEntry>> {
        Ok(read_lock(&self.entries)?
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    /// Entries appended at or after position `start`.
    pub fn since(&self, start: usize) -> DelveResult<Vec<TraceEntry>> {
        Ok(read_lock(&self.entries)?
            .get(start..)
            .map(<[TraceEntry]>::to_vec)
            .unwrap_or_default())
    }

    pub fn len(&self) -> DelveResult<usize> {
        Ok(read_lock(&self.entries)?.len())
    }

    pub fn is_empty(&self) -> DelveResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::{new_entity_id, TracePhase};

    #[test]
    fn test_append_and_filter_by_session() {
        let recorder = TraceRecorder::new();
        let a = new_entity_id();
        let b = new_entity_id();
        assert_eq!(recorder.append(TraceEntry::new(a, 1, TracePhase::Iterate, "p", "r")).unwrap(), 0);
        recorder.append(TraceEntry::new(b, 1, TracePhase::Iterate, "p", "r")).unwrap();
        recorder.append(TraceEntry::new(a, 2, TracePhase::Iterate, "p", "r")).unwrap();

        let session = recorder.session(a).unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session[1].iteration, 2);
        assert_eq!(recorder.since(1).unwrap().len(), 2);
        assert!(recorder.since(10).unwrap().is_empty());
    }
}
