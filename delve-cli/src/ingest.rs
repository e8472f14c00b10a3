//! Load a directory of text documents into ingestable pages.
//!
//! Files with a form feed are split on it, one page per segment. Other
//! files are cut into pages at paragraph boundaries.

use crate::error::{CliError, CliResult};
use delve_core::IngestDocument;
use std::path::Path;

/// Soft page size for files without form feeds.
pub const PAGE_CHARS: usize = 3_000;

const EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

/// Read every `.txt`/`.md` file directly under `dir`, sorted by file name.
pub fn load_directory(dir: &Path) -> CliResult<Vec<IngestDocument>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)?;
        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pages = split_pages(&text);
        if pages.is_empty() {
            tracing::warn!(path = %path.display(), "Skipping empty document");
            continue;
        }
        tracing::debug!(document = %id, pages = pages.len(), "Loaded document");
        documents.push(IngestDocument::from_pages(id.clone(), title_of(&text, &id), pages));
    }

    if documents.is_empty() {
        return Err(CliError::EmptyCorpus(dir.to_path_buf()));
    }
    Ok(documents)
}

/// First non-blank line with markdown heading marks removed.
pub fn title_of(text: &str, fallback: &str) -> String {
    text.lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

pub fn split_pages(text: &str) -> Vec<String> {
    if text.contains('\u{c}') {
        return text
            .split('\u{c}')
            .map(str::trim)
            .filter(|page| !page.is_empty())
            .map(str::to_string)
            .collect();
    }
    chunk_paragraphs(text, PAGE_CHARS)
}

/// Group paragraphs into pages of about `max_chars`. A paragraph longer than
/// `max_chars` becomes a page of its own.
fn chunk_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !current.is_empty() && current.len() + paragraph.len() + 2 > max_chars {
            pages.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}
