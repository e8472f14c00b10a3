//! In-memory reference corpus.

use crate::memory::{read_lock, write_lock};
use delve_core::{
    matches_query, Corpus, CorpusError, DelveError, DelveResult, Document, EntityRecord,
    IngestDocument, PageFilter, PageNode, Relationship, TocEntry,
};
use std::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct CorpusIndex {
    documents: Vec<Document>,
    pages: Vec<PageNode>,
    toc: Vec<TocEntry>,
    entities: Vec<EntityRecord>,
    relationships: Vec<Relationship>,
}

impl CorpusIndex {
    fn remove(&mut self, document_id: &str) {
        self.documents.retain(|d| d.id != document_id);
        self.pages.retain(|p| p.document_id != document_id);
        self.toc.retain(|t| t.document_id != document_id);
        self.entities.retain(|e| e.document_id != document_id);
        self.relationships.retain(|r| r.document_id != document_id);
    }

    fn insert(&mut self, doc: IngestDocument) {
        self.remove(&doc.id);
        self.documents.push(doc.document());
        self.pages.extend(doc.page_nodes());
        self.toc.extend(doc.toc_entries());
        self.entities.extend(doc.entities);
        self.relationships.extend(doc.relationships);
    }

    fn require_document(&self, id: &str) -> DelveResult<&Document> {
        self.documents.iter().find(|d| d.id == id).ok_or_else(|| {
            DelveError::Corpus(CorpusError::DocumentNotFound { id: id.to_string() })
        })
    }
}

/// Corpus held entirely in memory, in ingestion order.
///
/// Re-ingesting a document id replaces every row that document owned.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    index: RwLock<CorpusIndex>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a corpus from documents, failing on the first invalid one.
    pub fn with_documents(documents: Vec<IngestDocument>) -> DelveResult<Self> {
        let corpus = Self::new();
        corpus.ingest(documents)?;
        Ok(corpus)
    }

    pub fn document_count(&self) -> DelveResult<usize> {
        Ok(read_lock(&self.index)?.documents.len())
    }

    pub fn page_count(&self) -> DelveResult<usize> {
        Ok(read_lock(&self.index)?.pages.len())
    }
}

impl Corpus for InMemoryCorpus {
    fn list_documents(&self) -> DelveResult<Vec<Document>> {
        Ok(read_lock(&self.index)?.documents.clone())
    }

    fn get_document(&self, id: &str) -> DelveResult<Document> {
        read_lock(&self.index)?.require_document(id).cloned()
    }

    fn search_pages(&self, query: &str, limit: usize, filter: &PageFilter) -> DelveResult<Vec<PageNode>> {
        let index = read_lock(&self.index)?;
        Ok(index
            .pages
            .iter()
            .filter(|p| filter.matches(p))
            .filter(|p| {
                matches_query(&p.text, query)
                    || p.heading.as_deref().is_some_and(|h| matches_query(h, query))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_toc(&self, document_id: &str) -> DelveResult<Vec<TocEntry>> {
        let index = read_lock(&self.index)?;
        index.require_document(document_id)?;
        Ok(index
            .toc
            .iter()
            .filter(|t| t.document_id == document_id)
            .cloned()
            .collect())
    }

    fn search_toc(&self, query: &str) -> DelveResult<Vec<TocEntry>> {
        Ok(read_lock(&self.index)?
            .toc
            .iter()
            .filter(|t| matches_query(&t.title, query))
            .cloned()
            .collect())
    }

    fn get_toc(&self, id: &str) -> DelveResult<TocEntry> {
        read_lock(&self.index)?
            .toc
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| DelveError::Corpus(CorpusError::TocEntryNotFound { id: id.to_string() }))
    }

    fn search_entities(&self, query: &str) -> DelveResult<Vec<EntityRecord>> {
        Ok(read_lock(&self.index)?
            .entities
            .iter()
            .filter(|e| matches_query(&e.name, query) || matches_query(&e.kind, query))
            .cloned()
            .collect())
    }

    fn list_relationships(&self, document_id: &str) -> DelveResult<Vec<Relationship>> {
        let index = read_lock(&self.index)?;
        index.require_document(document_id)?;
        Ok(index
            .relationships
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect())
    }

    /// Validates every document before indexing any of them.
    fn ingest(&self, documents: Vec<IngestDocument>) -> DelveResult<usize> {
        for doc in &documents {
            doc.validate()?;
        }
        let count = documents.len();
        let mut index = write_lock(&self.index)?;
        for doc in documents {
            tracing::debug!(document_id = %doc.id, pages = doc.pages.len(), "Ingesting document");
            index.insert(doc);
        }
        Ok(count)
    }
}
