//! Corpus collaborator contract.
//!
//! The engine only ever reads through this trait. All searches are
//! case-insensitive substring matches returned in stable input order.

use crate::{CorpusError, DelveError, DelveResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub page_count: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One searchable page of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageNode {
    pub id: String,
    pub document_id: String,
    pub page: u32,
    pub heading: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub id: String,
    pub document_id: String,
    pub title: String,
    pub level: u32,
    pub page: u32,
}

/// A named entity mentioned in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub document_id: String,
    pub name: String,
    pub kind: String,
    pub pages: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub document_id: String,
    pub source: String,
    pub target: String,
    pub kind: String,
}

/// Restricts a page search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFilter {
    pub document_id: Option<String>,
    /// Inclusive page range.
    pub pages: Option<(u32, u32)>,
}

impl PageFilter {
    pub fn document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            pages: None,
        }
    }

    pub fn with_pages(mut self, from: u32, to: u32) -> Self {
        self.pages = Some((from.min(to), from.max(to)));
        self
    }

    pub fn matches(&self, node: &PageNode) -> bool {
        if let Some(doc) = &self.document_id {
            if &node.document_id != doc {
                return false;
            }
        }
        if let Some((from, to)) = self.pages {
            if node.page < from || node.page > to {
                return false;
            }
        }
        true
    }
}

/// A document handed to `ingest`, with everything the corpus indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestDocument {
    pub id: String,
    pub title: String,
    pub pages: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl IngestDocument {
    /// Build a document from page texts.
    pub fn from_pages(id: impl Into<String>, title: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            pages,
            metadata: BTreeMap::new(),
            entities: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_entity(mut self, name: impl Into<String>, kind: impl Into<String>, pages: Vec<u32>) -> Self {
        let name = name.into();
        self.entities.push(EntityRecord {
            id: format!("{}:entity:{}", self.id, self.entities.len() + 1),
            document_id: self.id.clone(),
            name,
            kind: kind.into(),
            pages,
        });
        self
    }

    pub fn with_relationship(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        self.relationships.push(Relationship {
            document_id: self.id.clone(),
            source: source.into(),
            target: target.into(),
            kind: kind.into(),
        });
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> DelveResult<()> {
        if self.id.trim().is_empty() {
            return Err(DelveError::Corpus(CorpusError::InvalidDocument {
                id: self.id.clone(),
                reason: "document id must not be empty".to_string(),
            }));
        }
        if self.pages.is_empty() {
            return Err(DelveError::Corpus(CorpusError::InvalidDocument {
                id: self.id.clone(),
                reason: "document has no pages".to_string(),
            }));
        }
        Ok(())
    }

    pub fn document(&self) -> Document {
        Document {
            id: self.id.clone(),
            title: self.title.clone(),
            page_count: self.pages.len() as u32,
            metadata: self.metadata.clone(),
        }
    }

    /// Page nodes, numbered from 1. The heading is the first heading line on the page.
    pub fn page_nodes(&self) -> Vec<PageNode> {
        self.pages
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let page = i as u32 + 1;
                PageNode {
                    id: format!("{}:page:{}", self.id, page),
                    document_id: self.id.clone(),
                    page,
                    heading: text.lines().find_map(parse_heading).map(|(_, t)| t),
                    text: text.clone(),
                }
            })
            .collect()
    }

    /// Table of contents derived from markdown-style heading lines (`#`, `##`, ...).
    pub fn toc_entries(&self) -> Vec<TocEntry> {
        let mut entries = Vec::new();
        for (i, text) in self.pages.iter().enumerate() {
            for (level, title) in text.lines().filter_map(parse_heading) {
                entries.push(TocEntry {
                    id: format!("{}:toc:{}", self.id, entries.len() + 1),
                    document_id: self.id.clone(),
                    title,
                    level,
                    page: i as u32 + 1,
                });
            }
        }
        entries
    }
}

fn parse_heading(line: &str) -> Option<(u32, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        None
    } else {
        Some((level as u32, title.to_string()))
    }
}

/// Case-insensitive substring match shared by corpus implementations.
pub fn matches_query(haystack: &str, query: &str) -> bool {
    query.is_empty() || haystack.to_lowercase().contains(&query.to_lowercase())
}

/// Read access to a document corpus.
pub trait Corpus: Send + Sync {
    fn list_documents(&self) -> DelveResult<Vec<Document>>;

    fn get_document(&self, id: &str) -> DelveResult<Document>;

    fn search_pages(&self, query: &str, limit: usize, filter: &PageFilter) -> DelveResult<Vec<PageNode>>;

    fn list_toc(&self, document_id: &str) -> DelveResult<Vec<TocEntry>>;

    fn search_toc(&self, query: &str) -> DelveResult<Vec<TocEntry>>;

    fn get_toc(&self, id: &str) -> DelveResult<TocEntry>;

    fn search_entities(&self, query: &str) -> DelveResult<Vec<EntityRecord>>;

    fn list_relationships(&self, document_id: &str) -> DelveResult<Vec<Relationship>>;

    /// Fetch a single page.
    fn get_page(&self, document_id: &str, page: u32) -> DelveResult<Option<PageNode>> {
        let filter = PageFilter::document(document_id).with_pages(page, page);
        Ok(self.search_pages("", 1, &filter)?.into_iter().next())
    }

    /// Load documents. Read-only corpora reject this.
    fn ingest(&self, _documents: Vec<IngestDocument>) -> DelveResult<usize> {
        Err(DelveError::Corpus(CorpusError::ReadOnly))
    }
}
