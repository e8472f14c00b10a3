//! Engine capabilities bound into every session's sandbox.
//!
//! Read capabilities go straight to the corpus and memory store. Write
//! capabilities only ever append: claims to the session's [`ClaimLog`],
//! learnings, votes and history notes to the shared memory store.

use delve_core::{
    Claim, Corpus, Document, EntityId, EntityRecord, HistoryEntry, HistoryRole, Learning,
    PageFilter, PageNode, Relationship, TocEntry, Value,
};
use delve_sandbox::{CapabilityFn, CapabilityKind, CapabilityRegistry};
use delve_storage::MemoryStore;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const DEFAULT_LEARNING_LIMIT: usize = 5;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

// ============================================================================
// CLAIM LOG
// ============================================================================

/// Claims cited during one session, in citation order.
#[derive(Debug, Clone, Default)]
pub struct ClaimLog(Arc<Mutex<Vec<Claim>>>);

impl ClaimLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Claim>> {
        // appends only, so a poisoned log is still consistent
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn push(&self, claim: Claim) {
        self.lock().push(claim);
    }

    pub fn snapshot(&self) -> Vec<Claim> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// VALUE CONVERSIONS
// ============================================================================

fn pages_value(pages: &[u32]) -> Value {
    Value::List(pages.iter().map(|p| Value::Number(f64::from(*p))).collect())
}

fn document_value(doc: &Document) -> Value {
    let metadata = doc
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v.as_str())));
    Value::map([
        ("id", Value::from(doc.id.as_str())),
        ("title", Value::from(doc.title.as_str())),
        ("page-count", Value::Number(f64::from(doc.page_count))),
        ("metadata", Value::map(metadata)),
    ])
}

fn page_value(page: &PageNode) -> Value {
    Value::map([
        ("id", Value::from(page.id.as_str())),
        ("document", Value::from(page.document_id.as_str())),
        ("page", Value::Number(f64::from(page.page))),
        ("heading", Value::from(page.heading.clone())),
        ("text", Value::from(page.text.as_str())),
    ])
}

fn toc_value(entry: &TocEntry) -> Value {
    Value::map([
        ("id", Value::from(entry.id.as_str())),
        ("document", Value::from(entry.document_id.as_str())),
        ("title", Value::from(entry.title.as_str())),
        ("level", Value::Number(f64::from(entry.level))),
        ("page", Value::Number(f64::from(entry.page))),
    ])
}

fn entity_value(entity: &EntityRecord) -> Value {
    Value::map([
        ("id", Value::from(entity.id.as_str())),
        ("document", Value::from(entity.document_id.as_str())),
        ("name", Value::from(entity.name.as_str())),
        ("kind", Value::from(entity.kind.as_str())),
        ("pages", pages_value(&entity.pages)),
    ])
}

fn relationship_value(rel: &Relationship) -> Value {
    Value::map([
        ("document", Value::from(rel.document_id.as_str())),
        ("source", Value::from(rel.source.as_str())),
        ("target", Value::from(rel.target.as_str())),
        ("kind", Value::from(rel.kind.as_str())),
    ])
}

fn learning_value(learning: &Learning) -> Value {
    Value::map([
        ("id", Value::from(learning.id.to_string())),
        ("insight", Value::from(learning.insight.as_str())),
        ("context", Value::from(learning.context.as_str())),
        ("votes", Value::Number(f64::from(learning.votes))),
    ])
}

fn history_value(entry: &HistoryEntry) -> Value {
    Value::map([
        ("role", Value::from(entry.role.to_string())),
        ("content", Value::from(entry.content.as_str())),
        ("timestamp", Value::from(entry.timestamp.to_rfc3339())),
    ])
}

fn list_of<T>(items: &[T], f: fn(&T) -> Value) -> Value {
    Value::List(items.iter().map(f).collect())
}

// ============================================================================
// ARGUMENTS
// ============================================================================

fn arity(args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(format!("expected {} argument(s), got {}", expected, args.len()));
    }
    Ok(())
}

fn string_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, String> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{} must be a string", name))
}

fn limit_arg(value: &Value) -> Result<usize, String> {
    value
        .as_i64()
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .ok_or_else(|| format!("limit must be a positive integer, got {}", value.to_readable()))
}

fn optional_limit(args: &[Value], index: usize, default: usize) -> Result<usize, String> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => limit_arg(value),
    }
}

fn page_number(value: &Value, key: &str) -> Result<u32, String> {
    value
        .as_i64()
        .filter(|n| *n >= 1)
        .map(|n| n as u32)
        .ok_or_else(|| format!(":{} must be a page number", key))
}

/// `{:document "msa" :from 2 :to 4}`; every key optional.
fn page_filter(value: &Value) -> Result<PageFilter, String> {
    let map = value
        .as_map()
        .ok_or_else(|| "filter must be a map".to_string())?;
    let mut filter = PageFilter::default();
    if let Some(doc) = map.get("document") {
        filter.document_id = Some(
            doc.as_str()
                .ok_or_else(|| ":document must be a string".to_string())?
                .to_string(),
        );
    }
    let from = map.get("from").map(|v| page_number(v, "from")).transpose()?;
    let to = map.get("to").map(|v| page_number(v, "to")).transpose()?;
    if from.is_some() || to.is_some() {
        filter = filter.with_pages(from.unwrap_or(1), to.unwrap_or(u32::MAX));
    }
    Ok(filter)
}

/// Accepts `(q)`, `(q limit)`, `(q filter)` and `(q limit filter)`.
fn search_pages_args(args: &[Value]) -> Result<(&str, usize, PageFilter), String> {
    arity(args, 1, 3)?;
    let query = string_arg(args, 0, "query")?;
    match &args[1..] {
        [] => Ok((query, DEFAULT_PAGE_LIMIT, PageFilter::default())),
        [filter @ Value::Map(_)] => Ok((query, DEFAULT_PAGE_LIMIT, page_filter(filter)?)),
        [limit] => Ok((query, limit_arg(limit)?, PageFilter::default())),
        [limit, filter] => Ok((query, limit_arg(limit)?, page_filter(filter)?)),
        _ => Err("too many arguments".to_string()),
    }
}

fn parse_learning_id(value: &Value) -> Result<EntityId, String> {
    let text = value
        .as_str()
        .ok_or_else(|| "learning id must be a string".to_string())?;
    EntityId::parse_str(text).map_err(|_| format!("not a learning id: {}", text))
}

// ============================================================================
// INSTALLATION
// ============================================================================

/// What a session's capabilities close over.
#[derive(Clone)]
pub struct SessionBindings {
    pub corpus: Arc<dyn Corpus>,
    pub memory: Arc<MemoryStore>,
    pub claims: ClaimLog,
    /// Question of the session, used as the default learning context.
    pub question: String,
    /// Bind `learn!`, `vote!` and `remember!`.
    pub memory_writes: bool,
}

fn capability<F>(f: F) -> CapabilityFn
where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Bind the engine capabilities on top of the caller's registry.
pub fn install(registry: &mut CapabilityRegistry, bindings: &SessionBindings) {
    install_corpus_reads(registry, &bindings.corpus);
    install_memory_reads(registry, &bindings.memory);

    let claims = bindings.claims.clone();
    registry.install_capability(
        "cite!",
        "(cite! claim quote [document-id]) record a claim with the verbatim quote that supports it; returns the claim id",
        CapabilityKind::Write,
        capability(move |args| {
            arity(args, 2, 3)?;
            let text = string_arg(args, 0, "claim")?;
            let source = string_arg(args, 1, "quote")?;
            let mut claim = Claim::new(text, source);
            if args.len() == 3 {
                claim = claim.with_document(string_arg(args, 2, "document-id")?);
            }
            let id = claim.id.to_string();
            claims.push(claim);
            Ok(Value::from(id))
        }),
    );

    if bindings.memory_writes {
        install_memory_writes(registry, &bindings.memory, &bindings.question);
    }
}

fn install_corpus_reads(registry: &mut CapabilityRegistry, corpus: &Arc<dyn Corpus>) {
    let c = Arc::clone(corpus);
    registry.install_capability(
        "list-documents",
        "(list-documents) all documents as maps with :id :title :page-count :metadata",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 0, 0)?;
            let docs = c.list_documents().map_err(|e| e.to_string())?;
            Ok(list_of(&docs, document_value))
        }),
    );

    let c = Arc::clone(corpus);
    registry.install_capability(
        "get-document",
        "(get-document id) one document map",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 1, 1)?;
            let doc = c
                .get_document(string_arg(args, 0, "id")?)
                .map_err(|e| e.to_string())?;
            Ok(document_value(&doc))
        }),
    );

    let c = Arc::clone(corpus);
    registry.install_capability(
        "search-pages",
        "(search-pages query [limit] [{:document id :from n :to n}]) case-insensitive substring search over page text and headings; pages as maps with :id :document :page :heading :text; default limit 10",
        CapabilityKind::Read,
        capability(move |args| {
            let (query, limit, filter) = search_pages_args(args)?;
            let pages = c
                .search_pages(query, limit, &filter)
                .map_err(|e| e.to_string())?;
            Ok(list_of(&pages, page_value))
        }),
    );

    let c = Arc::clone(corpus);
    registry.install_capability(
        "list-toc",
        "(list-toc document-id) table of contents entries with :id :title :level :page",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 1, 1)?;
            let entries = c
                .list_toc(string_arg(args, 0, "document-id")?)
                .map_err(|e| e.to_string())?;
            Ok(list_of(&entries, toc_value))
        }),
    );

    let c = Arc::clone(corpus);
    registry.install_capability(
        "search-toc",
        "(search-toc query) table of contents entries whose title contains query",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 1, 1)?;
            let entries = c
                .search_toc(string_arg(args, 0, "query")?)
                .map_err(|e| e.to_string())?;
            Ok(list_of(&entries, toc_value))
        }),
    );

    let c = Arc::clone(corpus);
    registry.install_capability(
        "get-toc",
        "(get-toc id) one table of contents entry",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 1, 1)?;
            let entry = c
                .get_toc(string_arg(args, 0, "id")?)
                .map_err(|e| e.to_string())?;
            Ok(toc_value(&entry))
        }),
    );

    let c = Arc::clone(corpus);
    registry.install_capability(
        "search-entities",
        "(search-entities query) named entities whose name or kind contains query, with :name :kind :document :pages",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 1, 1)?;
            let entities = c
                .search_entities(string_arg(args, 0, "query")?)
                .map_err(|e| e.to_string())?;
            Ok(list_of(&entities, entity_value))
        }),
    );

    let c = Arc::clone(corpus);
    registry.install_capability(
        "list-relationships",
        "(list-relationships document-id) relationships with :source :target :kind",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 1, 1)?;
            let rels = c
                .list_relationships(string_arg(args, 0, "document-id")?)
                .map_err(|e| e.to_string())?;
            Ok(list_of(&rels, relationship_value))
        }),
    );
}

fn install_memory_reads(registry: &mut CapabilityRegistry, memory: &Arc<MemoryStore>) {
    let m = Arc::clone(memory);
    registry.install_capability(
        "search-learnings",
        "(search-learnings query [limit]) insights from earlier sessions ranked by relevance, with :id :insight :context :votes; default limit 5",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 1, 2)?;
            let query = string_arg(args, 0, "query")?;
            let limit = optional_limit(args, 1, DEFAULT_LEARNING_LIMIT)?;
            let learnings = m.learning_search(query, limit).map_err(|e| e.to_string())?;
            Ok(list_of(&learnings, learning_value))
        }),
    );

    let m = Arc::clone(memory);
    registry.install_capability(
        "search-history",
        "(search-history query [limit]) earlier questions, answers and notes containing query, oldest first; default limit 10",
        CapabilityKind::Read,
        capability(move |args| {
            arity(args, 1, 2)?;
            let query = string_arg(args, 0, "query")?;
            let limit = optional_limit(args, 1, DEFAULT_HISTORY_LIMIT)?;
            let entries = m.history_search(query, limit).map_err(|e| e.to_string())?;
            Ok(list_of(&entries, history_value))
        }),
    );
}

fn install_memory_writes(registry: &mut CapabilityRegistry, memory: &Arc<MemoryStore>, question: &str) {
    let m = Arc::clone(memory);
    let default_context = question.to_string();
    registry.install_capability(
        "learn!",
        "(learn! insight [context]) store an insight for future sessions; returns its id",
        CapabilityKind::Write,
        capability(move |args| {
            arity(args, 1, 2)?;
            let insight = string_arg(args, 0, "insight")?;
            if insight.trim().is_empty() {
                return Err("insight must not be blank".to_string());
            }
            let context = match args.get(1) {
                Some(_) => string_arg(args, 1, "context")?.to_string(),
                None => default_context.clone(),
            };
            let learning = m.learn(insight, context).map_err(|e| e.to_string())?;
            tracing::debug!(learning_id = %learning.id, "Learning stored");
            Ok(Value::from(learning.id.to_string()))
        }),
    );

    let m = Arc::clone(memory);
    registry.install_capability(
        "vote!",
        "(vote! learning-id) mark a stored insight as useful; returns its vote count",
        CapabilityKind::Write,
        capability(move |args| {
            arity(args, 1, 1)?;
            let id = parse_learning_id(&args[0])?;
            let votes = m.vote(id).map_err(|e| e.to_string())?;
            Ok(Value::Number(f64::from(votes)))
        }),
    );

    let m = Arc::clone(memory);
    registry.install_capability(
        "remember!",
        "(remember! note) append a note to the conversation history",
        CapabilityKind::Write,
        capability(move |args| {
            arity(args, 1, 1)?;
            let note = string_arg(args, 0, "note")?;
            m.remember(HistoryRole::Note, note).map_err(|e| e.to_string())?;
            Ok(Value::Bool(true))
        }),
    );
}
