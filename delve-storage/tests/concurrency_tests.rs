//! Integration tests for concurrent use of the memory store.
//!
//! Tests verify:
//! - Concurrent appends from many writers are all retained
//! - Votes from many writers tally exactly
//! - A flushed store reloads with the same records

use delve_core::HistoryRole;
use delve_storage::{MemoryStore, TraceRecorder};
use std::sync::Arc;
use std::thread;

// ============================================================================
// TEST BUILDERS
// ============================================================================

fn spawn_writers<F>(store: &Arc<MemoryStore>, writers: usize, f: F)
where
    F: Fn(&MemoryStore, usize) + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let store = Arc::clone(store);
            let f = Arc::clone(&f);
            thread::spawn(move || f(&store, i))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

// ============================================================================
// CONCURRENCY TESTS
// ============================================================================

#[test]
fn test_concurrent_learnings_are_all_kept() {
    let store = Arc::new(MemoryStore::new());
    spawn_writers(&store, 8, |store, i| {
        for j in 0..25 {
            store
                .learn(format!("insight {}-{}", i, j), format!("session {}", i))
                .unwrap();
        }
    });

    let learnings = store.learnings().unwrap();
    assert_eq!(learnings.len(), 200);
    let mut ids: Vec<_> = learnings.iter().map(|l| l.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 200);
}

#[test]
fn test_concurrent_votes_tally_exactly() {
    let store = Arc::new(MemoryStore::new());
    let learning = store.learn("Parties are in the preamble", "msa").unwrap();
    let id = learning.id;
    spawn_writers(&store, 10, move |store, _| {
        for _ in 0..10 {
            store.vote(id).unwrap();
        }
    });
    assert_eq!(store.learning_get(id).unwrap().unwrap().votes, 100);
}

#[test]
fn test_concurrent_history_and_trace() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(TraceRecorder::new());
    let rec = Arc::clone(&recorder);
    spawn_writers(&store, 4, move |store, i| {
        let session = delve_core::new_entity_id();
        for j in 0..10 {
            store
                .remember(HistoryRole::User, format!("q{}-{}", i, j))
                .unwrap();
            rec.append(delve_core::TraceEntry::new(
                session,
                j,
                delve_core::TracePhase::Iterate,
                "prompt",
                "response",
            ))
            .unwrap();
        }
    });
    assert_eq!(store.history_count().unwrap(), 40);
    assert_eq!(recorder.len().unwrap(), 40);
}

#[test]
fn test_flush_after_concurrent_writes_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.jsonl");
    let store = Arc::new(MemoryStore::new());
    spawn_writers(&store, 4, |store, i| {
        let l = store.learn(format!("insight {}", i), "ctx").unwrap();
        store.vote(l.id).unwrap();
    });
    store.flush(&path).unwrap();

    let loaded = MemoryStore::load(&path).unwrap();
    assert_eq!(loaded.learning_count().unwrap(), 4);
    assert!(loaded.learnings().unwrap().iter().all(|l| l.votes == 1));
}
