//! Phase tasks, guidance and answer formats.

use delve_core::{
    Category, Difficulty, FieldSpec, OutputSpec, PageNode, Passage, QuestionRecord, Verdict,
};
use std::fmt::Write;

// ============================================================================
// SELECTION
// ============================================================================

pub const SELECTION_GUIDANCE: &str = "\
You are selecting passages as source material for a question/answer dataset. \
Browse the corpus structure (list-documents, list-toc, search-toc, search-pages) and pick pages \
that hold concrete, self-contained facts. Spread the selection across documents and sections. \
Skip pages that are only headings, boilerplate or tables of contents.";

pub fn selection_task(target: usize) -> String {
    format!("Select {} passages for question generation.", target)
}

/// Context for a selection round, naming what earlier rounds already picked.
pub fn selection_context(target: usize, selected: &[Passage]) -> String {
    let mut out = format!("Return exactly {} passages that are not listed below.", target);
    if !selected.is_empty() {
        out.push_str("\nAlready selected:");
        for passage in selected {
            let _ = write!(out, "\n- {} page {}", passage.document_id, passage.page);
        }
    }
    out
}

pub fn selection_spec() -> OutputSpec {
    OutputSpec::list_of(OutputSpec::map_of([
        ("document", FieldSpec::required(OutputSpec::String)),
        ("page", FieldSpec::required(OutputSpec::Number)),
        ("rationale", FieldSpec::optional(OutputSpec::String)),
    ]))
}

// ============================================================================
// GENERATION
// ============================================================================

pub const GENERATION_GUIDANCE: &str = "\
You are writing question/answer pairs from the passages given as context. For each passage write \
one or two pairs with the requested difficulty and category. Every answer needs an evidence field \
that quotes the passage verbatim. Questions must stand alone: never refer to \"the document\", \
\"this section\", \"the passage\" or \"the text\"; name the agreement or party instead. \
You may read more of the corpus to understand a passage, but answers must be supported by the quoted evidence.";

pub const GENERATION_TASK: &str = "Write question/answer pairs for the passages in the context.";

/// One block per passage with its assigned difficulty and category.
pub fn generation_context(items: &[(Passage, Option<PageNode>, Difficulty, Category)]) -> String {
    let mut out = String::new();
    for (i, (passage, page, difficulty, category)) in items.iter().enumerate() {
        let _ = writeln!(
            out,
            "### Passage {} ({} page {}, difficulty: {}, category: {})",
            i + 1,
            passage.document_id,
            passage.page,
            difficulty,
            category
        );
        match page {
            Some(page) => {
                let _ = writeln!(out, "{}\n", page.text.trim());
            }
            None => {
                let _ = writeln!(out, "(page not found; use search-pages to read it)\n");
            }
        }
    }
    out.trim_end().to_string()
}

fn enum_of<T: ToString>(values: impl IntoIterator<Item = T>) -> OutputSpec {
    OutputSpec::one_of(values.into_iter().map(|v| v.to_string()).collect::<Vec<_>>())
}

pub fn generation_spec() -> OutputSpec {
    OutputSpec::list_of(OutputSpec::map_of([
        ("question", FieldSpec::required(OutputSpec::String)),
        ("answer", FieldSpec::required(OutputSpec::String)),
        ("evidence", FieldSpec::required(OutputSpec::String)),
        ("document", FieldSpec::required(OutputSpec::String)),
        ("page", FieldSpec::required(OutputSpec::Number)),
        ("difficulty", FieldSpec::required(enum_of(Difficulty::ALL))),
        ("category", FieldSpec::required(enum_of(Category::ALL))),
    ]))
}

// ============================================================================
// VERIFICATION
// ============================================================================

pub const VERIFICATION_GUIDANCE: &str = "\
You are reviewing question/answer records. Check each record three ways: grounded (search the \
corpus for its evidence; the evidence exists and supports the answer), non-trivial (not answerable \
from a heading alone) and self-contained (understandable without the source at hand). \
Give verdict pass only when all three hold, needs-revision when a small edit would fix it, fail otherwise.";

pub const VERIFICATION_TASK: &str = "Assign a verdict to every numbered record in the context.";

pub fn verification_spec() -> OutputSpec {
    OutputSpec::list_of(OutputSpec::map_of([
        ("index", FieldSpec::required(OutputSpec::Number)),
        (
            "verdict",
            FieldSpec::required(enum_of([Verdict::Pass, Verdict::Fail, Verdict::NeedsRevision])),
        ),
        ("reason", FieldSpec::optional(OutputSpec::String)),
    ]))
}

// ============================================================================
// DEDUPLICATION
// ============================================================================

pub const DEDUP_GUIDANCE: &str = "\
You are removing duplicate questions from a dataset. Records that ask for the same fact, even in \
different words, are duplicates; keep only the clearest, best-evidenced one of each group.";

pub const DEDUP_TASK: &str = "Return the indices of the records to keep.";

pub fn dedup_spec() -> OutputSpec {
    OutputSpec::list_of(OutputSpec::Number)
}

/// Numbered listing of records, used by verification and deduplication.
pub fn numbered_records(records: &[QuestionRecord], with_evidence: bool) -> String {
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        let _ = write!(
            out,
            "[{}] ({} page {}, {}, {})\nQ: {}\nA: {}",
            i, record.document_id, record.page, record.difficulty, record.category, record.question, record.answer
        );
        if with_evidence {
            let _ = write!(out, "\nEvidence: {}", record.evidence);
        }
        out.push_str("\n\n");
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_context_lists_taken_pages() {
        let text = selection_context(5, &[Passage::new("msa", 2, "services")]);
        assert!(text.contains("exactly 5"));
        assert!(text.contains("- msa page 2"));
    }

    #[test]
    fn test_generation_spec_enumerates_tags() {
        let described = generation_spec().describe();
        assert!(described.contains("hard"));
        assert!(described.contains("numerical"));
    }

    #[test]
    fn test_numbered_records() {
        let record = QuestionRecord::new(
            "What is the base rent under the office lease?",
            "8,500 USD per month",
            "Base rent is 8,500 USD per month",
            "lease",
            3,
            Difficulty::Easy,
            Category::Numerical,
        );
        let text = numbered_records(&[record.clone(), record], true);
        assert!(text.starts_with("[0] (lease page 3, easy, numerical)"));
        assert!(text.contains("[1]"));
        assert!(text.contains("Evidence: Base rent"));
    }
}
