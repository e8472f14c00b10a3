//! Post-processing collaborators: input screening and output humanizing.
//!
//! Neither participates in loop control. The engine calls the guard once
//! before a session and the humanizer over free text after it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Result of screening a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    Reject { reason: String },
}

/// Screens caller input before it reaches a prompt.
pub trait InputGuard: Send + Sync {
    fn screen(&self, input: &str) -> GuardVerdict;
}

/// Rewrites model-produced free text.
pub trait TextPostProcessor: Send + Sync {
    fn process(&self, text: &str) -> String;
}

/// Rejects inputs that try to override the system prompt.
#[derive(Debug, Clone)]
pub struct InjectionGuard {
    patterns: Vec<Regex>,
}

impl InjectionGuard {
    pub fn new() -> Self {
        let sources = [
            r"(?i)ignore\s+(all\s+)?(the\s+)?(previous|prior|above)\s+instructions",
            r"(?i)disregard\s+(all\s+)?(the\s+)?(previous|prior|above)",
            r"(?i)you\s+are\s+now\s+(in\s+)?developer\s+mode",
            r"(?i)reveal\s+(your\s+)?system\s+prompt",
        ];
        Self {
            patterns: sources.iter().filter_map(|s| Regex::new(s).ok()).collect(),
        }
    }
}

impl Default for InjectionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl InputGuard for InjectionGuard {
    fn screen(&self, input: &str) -> GuardVerdict {
        match self.patterns.iter().find(|p| p.is_match(input)) {
            Some(pattern) => GuardVerdict::Reject {
                reason: format!("input matches injection pattern {}", pattern.as_str()),
            },
            None => GuardVerdict::Allow,
        }
    }
}

static OPENERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(certainly|sure|of course|great question|absolutely)[!,.]\s*")
        .expect("Invalid opener regex")
});

static EM_DASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\u{2014}\s*").expect("Invalid dash regex"));

/// Strips stock assistant phrasing from generated text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Humanizer;

impl TextPostProcessor for Humanizer {
    fn process(&self, text: &str) -> String {
        let text = OPENERS.replace(text, "");
        let text = EM_DASH.replace_all(&text, ", ");
        let mut out = text.trim().to_string();
        if let Some(first) = out.chars().next() {
            if first.is_lowercase() {
                out = first.to_uppercase().collect::<String>() + &out[first.len_utf8()..];
            }
        }
        out
    }
}
