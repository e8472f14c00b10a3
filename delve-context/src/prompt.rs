//! System prompt assembly under a token budget.

use crate::{estimate_tokens, truncate_to_token_budget};
use serde::{Deserialize, Serialize};

/// Kind of system-prompt section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionKind {
    /// Role and workflow instructions
    Instructions,
    /// Documentation of callable sandbox functions
    Capabilities,
    /// Required output shape
    Schema,
    /// Insights from earlier sessions
    Learnings,
    /// Phase-specific guidance supplied by the caller
    Guidance,
}

/// A titled block of the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSection {
    pub kind: SectionKind,
    pub title: Option<String>,
    pub content: String,
    /// Higher is more important.
    pub priority: i32,
    /// Whether this section may be truncated to fit.
    pub compressible: bool,
}

impl PromptSection {
    pub fn new(kind: SectionKind, content: impl Into<String>, priority: i32) -> Self {
        Self {
            kind,
            title: None,
            content: content.into(),
            priority,
            compressible: true,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_compressible(mut self, compressible: bool) -> Self {
        self.compressible = compressible;
        self
    }

    fn render(&self) -> String {
        match &self.title {
            Some(title) => format!("## {}\n{}", title, self.content),
            None => self.content.clone(),
        }
    }
}

/// Action taken during prompt assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssemblyAction {
    Include,
    Exclude,
    Truncate,
}

/// Decision made during prompt assembly, kept for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyDecision {
    pub action: AssemblyAction,
    pub kind: SectionKind,
    pub reason: String,
    pub tokens: usize,
}

/// Result of `PromptAssembler::assemble`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledPrompt {
    pub text: String,
    pub used_tokens: usize,
    pub decisions: Vec<AssemblyDecision>,
}

impl AssembledPrompt {
    pub fn truncated(&self) -> bool {
        self.decisions
            .iter()
            .any(|d| d.action != AssemblyAction::Include)
    }
}

/// Adds sections by priority until the budget is exhausted.
///
/// Non-compressible sections are always included, even over budget; the
/// remaining budget then goes to the others in priority order. Output keeps
/// the order in which sections were supplied.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    budget: usize,
}

impl PromptAssembler {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn assemble(&self, sections: Vec<PromptSection>) -> AssembledPrompt {
        let mut rendered: Vec<Option<String>> = vec![None; sections.len()];
        let mut decisions = Vec::new();
        let mut used = 0usize;

        for (i, section) in sections.iter().enumerate() {
            if !section.compressible {
                let text = section.render();
                let tokens = estimate_tokens(&text);
                used += tokens;
                decisions.push(AssemblyDecision {
                    action: AssemblyAction::Include,
                    kind: section.kind,
                    reason: "Required section".to_string(),
                    tokens,
                });
                rendered[i] = Some(text);
            }
        }

        let mut order: Vec<usize> = (0..sections.len())
            .filter(|i| sections[*i].compressible)
            .collect();
        order.sort_by(|a, b| sections[*b].priority.cmp(&sections[*a].priority));

        for i in order {
            let section = &sections[i];
            let text = section.render();
            let tokens = estimate_tokens(&text);
            let remaining = self.budget.saturating_sub(used);

            if tokens <= remaining {
                used += tokens;
                decisions.push(AssemblyDecision {
                    action: AssemblyAction::Include,
                    kind: section.kind,
                    reason: "Fits within budget".to_string(),
                    tokens,
                });
                rendered[i] = Some(text);
            } else if remaining > 0 {
                let cut = truncate_to_token_budget(&text, remaining);
                let cut_tokens = estimate_tokens(&cut);
                used += cut_tokens;
                decisions.push(AssemblyDecision {
                    action: AssemblyAction::Truncate,
                    kind: section.kind,
                    reason: format!("Truncated from {} to {} tokens", tokens, cut_tokens),
                    tokens: cut_tokens,
                });
                if !cut.is_empty() {
                    rendered[i] = Some(cut);
                }
            } else {
                decisions.push(AssemblyDecision {
                    action: AssemblyAction::Exclude,
                    kind: section.kind,
                    reason: format!("Budget exhausted, needed {} tokens", tokens),
                    tokens: 0,
                });
            }
        }

        AssembledPrompt {
            text: rendered.into_iter().flatten().collect::<Vec<_>>().join("\n\n"),
            used_tokens: used,
            decisions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_sections_fit_in_original_order() {
        let assembled = PromptAssembler::new(1000).assemble(vec![
            PromptSection::new(SectionKind::Instructions, "Be precise.", 100).with_compressible(false),
            PromptSection::new(SectionKind::Learnings, "Tip one.", 10).with_title("Learnings"),
            PromptSection::new(SectionKind::Capabilities, "(search-pages q)", 90),
        ]);
        assert_eq!(
            assembled.text,
            "Be precise.\n\n## Learnings\nTip one.\n\n(search-pages q)"
        );
        assert!(!assembled.truncated());
        assert_eq!(assembled.decisions.len(), 3);
    }

    #[test]
    fn test_low_priority_section_dropped_first() {
        let big = "word ".repeat(100);
        let assembled = PromptAssembler::new(10).assemble(vec![
            PromptSection::new(SectionKind::Instructions, "Rules.", 100).with_compressible(false),
            PromptSection::new(SectionKind::Capabilities, "cap docs", 90),
            PromptSection::new(SectionKind::Learnings, big, 1),
        ]);
        assert!(assembled.text.starts_with("Rules.\n\ncap docs"));
        let learning = assembled
            .decisions
            .iter()
            .find(|d| d.kind == SectionKind::Learnings)
            .unwrap();
        assert_ne!(learning.action, AssemblyAction::Include);
        assert!(assembled.truncated());
    }

    #[test]
    fn test_required_section_kept_over_budget() {
        let long = "Required instructions. ".repeat(20);
        let assembled = PromptAssembler::new(5).assemble(vec![
            PromptSection::new(SectionKind::Instructions, long.clone(), 100).with_compressible(false),
            PromptSection::new(SectionKind::Schema, "string", 50),
        ]);
        assert_eq!(assembled.text, long);
        let schema = assembled
            .decisions
            .iter()
            .find(|d| d.kind == SectionKind::Schema)
            .unwrap();
        assert_eq!(schema.action, AssemblyAction::Exclude);
    }
}
