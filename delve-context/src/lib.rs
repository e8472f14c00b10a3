//! DELVE Context - Token Budgeting
//!
//! Token estimation, truncation, system-prompt assembly and the per-session
//! conversation that is trimmed to fit the context budget.

pub mod conversation;
pub mod prompt;

pub use conversation::{Conversation, Exchange};
pub use prompt::{AssembledPrompt, AssemblyAction, AssemblyDecision, PromptAssembler, PromptSection, SectionKind};

// ============================================================================
// TOKEN UTILITIES
// ============================================================================

/// Estimate token count for text: roughly 3 tokens per 10 bytes of
/// English prose or code. Good enough for budgeting, not for billing.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() * 3).div_ceil(10)
}

/// Largest byte length whose estimate fits in `budget` tokens.
fn max_bytes_for(budget: usize) -> usize {
    budget * 10 / 3
}

// ============================================================================
// SMART TRUNCATION
// ============================================================================

/// Truncate text to fit within token budget.
/// Prefers sentence boundaries, falls back to word boundaries.
pub fn truncate_to_token_budget(text: &str, budget: usize) -> String {
    if budget == 0 {
        return String::new();
    }

    let max_bytes = max_bytes_for(budget);
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let truncated = safe_truncate(text, max_bytes);

    let last_sentence = [truncated.rfind('.'), truncated.rfind('?'), truncated.rfind('!')]
        .into_iter()
        .flatten()
        .max();
    if let Some(pos) = last_sentence {
        if pos > max_bytes / 2 {
            return truncated[..=pos].to_string();
        }
    }

    if let Some(pos) = truncated.rfind(' ') {
        if pos > max_bytes * 4 / 5 {
            return truncated[..pos].to_string();
        }
    }

    truncated.to_string()
}

/// Cut text to at most `max_chars` bytes, appending a marker that says how
/// much was dropped. Used for observations and sandbox stdout.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let kept = safe_truncate(text, max_chars);
    format!("{}\n... [truncated {} chars]", kept, text.len() - kept.len())
}

/// Safely truncate a string at a UTF-8 boundary.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_ratio() {
        // 100 bytes -> 30 tokens
        assert_eq!(estimate_tokens(&"a".repeat(100)), 30);
        // 5 bytes -> 1.5, rounded up
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn test_truncate_empty_budget() {
        assert_eq!(truncate_to_token_budget("hello world", 0), "");
    }

    #[test]
    fn test_truncate_fits() {
        assert_eq!(truncate_to_token_budget("hello", 100), "hello");
    }

    #[test]
    fn test_truncate_sentence_boundary() {
        let text = "First sentence. Second sentence. Third sentence.";
        // 12 tokens ~ 40 bytes
        let result = truncate_to_token_budget(text, 12);
        assert_eq!(result, "First sentence. Second sentence.");
    }

    #[test]
    fn test_truncate_with_marker() {
        assert_eq!(truncate_with_marker("short", 10), "short");
        let out = truncate_with_marker(&"x".repeat(50), 20);
        assert!(out.starts_with(&"x".repeat(20)));
        assert!(out.ends_with("[truncated 30 chars]"));
    }

    #[test]
    fn test_safe_truncate_utf8() {
        let s = "héllo";
        // byte 2 is inside 'é'
        assert_eq!(safe_truncate(s, 2), "h");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Truncated text never exceeds the budget and is a prefix of the input.
        #[test]
        fn prop_truncate_respects_budget(text in ".{0,400}", budget in 1usize..200) {
            let out = truncate_to_token_budget(&text, budget);
            prop_assert!(estimate_tokens(&out) <= budget);
            prop_assert!(text.starts_with(&out));
        }

        #[test]
        fn prop_marker_truncation_keeps_prefix(text in ".{0,300}", max in 0usize..100) {
            let out = truncate_with_marker(&text, max);
            let kept = out.split("\n... [truncated").next().unwrap_or("");
            prop_assert!(text.starts_with(kept));
            prop_assert!(kept.len() <= max || out == text);
        }
    }
}
