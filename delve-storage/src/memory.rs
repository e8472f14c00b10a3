//! Append-only memory store.
//!
//! Three independent logs: conversation history, learnings, and votes for
//! learnings. Records are never edited or removed. A learning's vote count
//! is derived from the vote log at read time, so voting never touches the
//! learning itself.

use delve_core::{
    matches_query, DelveError, DelveResult, EntityId, HistoryEntry, HistoryRole, Learning,
    StorageError, Vote,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "which", "who", "with", "that", "this", "from",
    "all", "any", "how", "does", "did", "has", "have", "into", "its", "not", "you",
];

/// Lowercased terms of three or more characters, minus common stopwords.
pub fn query_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn overlap(terms: &BTreeSet<String>, text: &str) -> usize {
    query_terms(text).intersection(terms).count()
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> DelveResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| DelveError::Storage(StorageError::LockPoisoned))
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> DelveResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| DelveError::Storage(StorageError::LockPoisoned))
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Learnings and history scoped to one Environment.
#[derive(Debug, Default)]
pub struct MemoryStore {
    history: RwLock<Vec<HistoryEntry>>,
    learnings: RwLock<Vec<Learning>>,
    votes: RwLock<Vec<Vote>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === History ===

    pub fn history_append(&self, entry: HistoryEntry) -> DelveResult<()> {
        write_lock(&self.history)?.push(entry);
        Ok(())
    }

    /// Convenience for `history_append(HistoryEntry::new(role, content))`.
    pub fn remember(&self, role: HistoryRole, content: impl Into<String>) -> DelveResult<HistoryEntry> {
        let entry = HistoryEntry::new(role, content);
        self.history_append(entry.clone())?;
        Ok(entry)
    }

    pub fn history(&self) -> DelveResult<Vec<HistoryEntry>> {
        Ok(read_lock(&self.history)?.clone())
    }

    pub fn history_count(&self) -> DelveResult<usize> {
        Ok(read_lock(&self.history)?.len())
    }

    /// Case-insensitive substring search, returning the most recent `limit`
    /// matches in chronological order.
    pub fn history_search(&self, query: &str, limit: usize) -> DelveResult<Vec<HistoryEntry>> {
        let history = read_lock(&self.history)?;
        let matches: Vec<&HistoryEntry> = history
            .iter()
            .filter(|e| matches_query(&e.content, query))
            .collect();
        let skip = matches.len().saturating_sub(limit);
        Ok(matches.into_iter().skip(skip).cloned().collect())
    }

    // === Learnings ===

    pub fn learning_insert(&self, learning: Learning) -> DelveResult<Learning> {
        let mut stored = learning;
        stored.votes = 0;
        write_lock(&self.learnings)?.push(stored.clone());
        let tally = self.vote_tally()?;
        Ok(with_votes(stored, &tally))
    }

    /// Create and store a learning.
    pub fn learn(&self, insight: impl Into<String>, context: impl Into<String>) -> DelveResult<Learning> {
        self.learning_insert(Learning::new(insight, context))
    }

    pub fn learning_get(&self, id: EntityId) -> DelveResult<Option<Learning>> {
        let tally = self.vote_tally()?;
        let learnings = read_lock(&self.learnings)?;
        Ok(learnings
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .map(|l| with_votes(l, &tally)))
    }

    /// All learnings in insertion order, with current vote counts.
    pub fn learnings(&self) -> DelveResult<Vec<Learning>> {
        let tally = self.vote_tally()?;
        let learnings = read_lock(&self.learnings)?;
        Ok(learnings
            .iter()
            .cloned()
            .map(|l| with_votes(l, &tally))
            .collect())
    }

    pub fn learning_count(&self) -> DelveResult<usize> {
        Ok(read_lock(&self.learnings)?.len())
    }

    /// Rank learnings by term overlap with `query`, then votes, then recency.
    ///
    /// Learnings sharing no term with the query are excluded. An empty
    /// query ranks everything by votes and recency.
    pub fn learning_search(&self, query: &str, limit: usize) -> DelveResult<Vec<Learning>> {
        let terms = query_terms(query);
        let mut scored: Vec<(usize, Learning)> = self
            .learnings()?
            .into_iter()
            .map(|l| {
                let score = overlap(&terms, &format!("{} {}", l.insight, l.context));
                (score, l)
            })
            .filter(|(score, _)| terms.is_empty() || *score > 0)
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| b.votes.cmp(&a.votes))
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(scored.into_iter().take(limit).map(|(_, l)| l).collect())
    }

    // === Votes ===

    /// Append a vote and return the learning's new vote count.
    pub fn vote(&self, learning_id: EntityId) -> DelveResult<u32> {
        if !read_lock(&self.learnings)?.iter().any(|l| l.id == learning_id) {
            return Err(DelveError::Storage(StorageError::LearningNotFound {
                id: learning_id.to_string(),
            }));
        }
        let mut votes = write_lock(&self.votes)?;
        votes.push(Vote {
            learning_id,
            created_at: delve_core::now(),
        });
        Ok(votes.iter().filter(|v| v.learning_id == learning_id).count() as u32)
    }

    pub fn votes(&self) -> DelveResult<Vec<Vote>> {
        Ok(read_lock(&self.votes)?.clone())
    }

    pub fn vote_count(&self) -> DelveResult<usize> {
        Ok(read_lock(&self.votes)?.len())
    }

    fn vote_tally(&self) -> DelveResult<HashMap<EntityId, u32>> {
        let mut tally = HashMap::new();
        for vote in read_lock(&self.votes)?.iter() {
            *tally.entry(vote.learning_id).or_insert(0) += 1;
        }
        Ok(tally)
    }

    /// Restore a vote without checking that its learning exists.
    pub(crate) fn vote_restore(&self, vote: Vote) -> DelveResult<()> {
        write_lock(&self.votes)?.push(vote);
        Ok(())
    }
}

fn with_votes(mut learning: Learning, tally: &HashMap<EntityId, u32>) -> Learning {
    learning.votes = tally.get(&learning.id).copied().unwrap_or(0);
    learning
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_drop_short_words_and_stopwords() {
        let terms = query_terms("What are the parties to the Lease?");
        assert_eq!(
            terms.into_iter().collect::<Vec<_>>(),
            vec!["lease".to_string(), "parties".to_string()]
        );
    }

    #[test]
    fn test_vote_counts_derived_from_log() {
        let store = MemoryStore::new();
        let learning = store.learn("Parties are on page 1", "lease").unwrap();
        assert_eq!(store.vote(learning.id).unwrap(), 1);
        assert_eq!(store.vote(learning.id).unwrap(), 2);
        assert_eq!(store.learning_get(learning.id).unwrap().unwrap().votes, 2);
        assert_eq!(store.vote_count().unwrap(), 2);
    }

    #[test]
    fn test_inserted_learning_matches_stored_copy() {
        let store = MemoryStore::new();
        let mut learning = Learning::new("Fees are on page 2", "msa");
        learning.votes = 7;
        let returned = store.learning_insert(learning).unwrap();
        assert_eq!(returned.votes, 0);
        assert_eq!(store.learnings().unwrap(), vec![returned]);
    }

    #[test]
    fn test_vote_unknown_learning() {
        let store = MemoryStore::new();
        let err = store.vote(delve_core::new_entity_id()).unwrap_err();
        assert!(matches!(
            err,
            DelveError::Storage(StorageError::LearningNotFound { .. })
        ));
    }

    #[test]
    fn test_learning_search_ranks_by_overlap_then_votes() {
        let store = MemoryStore::new();
        let weak = store.learn("Termination clauses live near the end", "contracts").unwrap();
        let strong = store
            .learn("Lease parties are listed in the preamble", "lease parties")
            .unwrap();
        let voted = store.learn("Lease rent is monthly", "lease").unwrap();
        store.vote(voted.id).unwrap();

        let hits = store.learning_search("Who are the parties to the lease?", 5).unwrap();
        let ids: Vec<_> = hits.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![strong.id, voted.id]);
        assert!(!ids.contains(&weak.id));
    }

    #[test]
    fn test_learning_search_empty_query_returns_all() {
        let store = MemoryStore::new();
        store.learn("a insight", "x").unwrap();
        store.learn("b insight", "y").unwrap();
        assert_eq!(store.learning_search("", 10).unwrap().len(), 2);
        assert_eq!(store.learning_search("", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_history_search_keeps_most_recent() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .remember(HistoryRole::User, format!("question about rent {}", i))
                .unwrap();
        }
        store.remember(HistoryRole::Assistant, "unrelated").unwrap();
        let hits = store.history_search("RENT", 2).unwrap();
        let contents: Vec<_> = hits.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["question about rent 3", "question about rent 4"]);
    }
}
