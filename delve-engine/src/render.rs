//! Plain-text rendering of a query trace for humans.

use delve_context::safe_truncate;
use delve_core::{ExecutionOutcome, TraceEntry, TracePhase};
use std::fmt::Write;

/// What `render_trace` includes.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub show_prompts: bool,
    pub show_responses: bool,
    /// Per-field byte cap; 0 means unlimited.
    pub max_chars: usize,
    /// Only these phases, when set.
    pub phases: Option<Vec<TracePhase>>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            show_prompts: false,
            show_responses: true,
            max_chars: 400,
            phases: None,
        }
    }
}

impl RenderOptions {
    pub fn verbose() -> Self {
        Self {
            show_prompts: true,
            max_chars: 0,
            ..Self::default()
        }
    }

    fn clip(&self, text: &str) -> String {
        let text = text.trim_end();
        if self.max_chars == 0 || text.len() <= self.max_chars {
            return text.to_string();
        }
        format!("{}...", safe_truncate(text, self.max_chars))
    }

    fn includes(&self, phase: TracePhase) -> bool {
        self.phases.as_ref().map_or(true, |p| p.contains(&phase))
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn outcome_line(outcome: &ExecutionOutcome, options: &RenderOptions) -> Option<String> {
    match outcome {
        ExecutionOutcome::NoCode => Some("no code".to_string()),
        ExecutionOutcome::Value { value, .. } => Some(format!("=> {}", options.clip(&value.to_readable()))),
        ExecutionOutcome::Error { message, .. } => Some(format!("error: {}", options.clip(message))),
        ExecutionOutcome::Final { value, .. } => Some(format!("FINAL {}", options.clip(&value.to_readable()))),
        ExecutionOutcome::Plan { text, .. } => Some(format!("plan: {}", options.clip(text))),
        ExecutionOutcome::Completion => None,
    }
}

fn stdout_of(outcome: &ExecutionOutcome) -> &str {
    match outcome {
        ExecutionOutcome::Value { stdout, .. }
        | ExecutionOutcome::Error { stdout, .. }
        | ExecutionOutcome::Final { stdout, .. }
        | ExecutionOutcome::Plan { stdout, .. } => stdout,
        ExecutionOutcome::NoCode | ExecutionOutcome::Completion => "",
    }
}

/// Render trace entries in order, one block per entry.
pub fn render_trace(entries: &[TraceEntry], options: &RenderOptions) -> String {
    let mut out = String::new();
    for entry in entries.iter().filter(|e| options.includes(e.phase)) {
        let _ = write!(out, "[{} #{}]", entry.phase, entry.iteration);
        if let Some(label) = &entry.label {
            let _ = write!(out, " ({})", label);
        }
        let _ = writeln!(out, " {}ms", entry.duration_ms);

        if options.show_prompts && !entry.prompt.is_empty() {
            let _ = writeln!(out, "  prompt:\n{}", indent(&options.clip(&entry.prompt)));
        }
        if let Some(code) = &entry.code {
            let _ = writeln!(out, "  code:\n{}", indent(&options.clip(code)));
        } else if options.show_responses && !entry.response.is_empty() {
            let _ = writeln!(out, "  response:\n{}", indent(&options.clip(&entry.response)));
        }
        let stdout = stdout_of(&entry.outcome);
        if !stdout.is_empty() {
            let _ = writeln!(out, "  stdout:\n{}", indent(&options.clip(stdout)));
        }
        if let Some(line) = outcome_line(&entry.outcome, options) {
            let _ = writeln!(out, "  {}", line);
        }
        out.push('\n');
    }
    out
}

/// Print a rendered trace to stdout.
pub fn print_trace(entries: &[TraceEntry], options: &RenderOptions) {
    print!("{}", render_trace(entries, options));
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::{new_entity_id, Value};

    fn entries() -> Vec<TraceEntry> {
        let session = new_entity_id();
        vec![
            TraceEntry::new(session, 0, TracePhase::Plan, "question", "1. search parties")
                .with_outcome(ExecutionOutcome::Plan {
                    text: "1. search parties".to_string(),
                    stdout: String::new(),
                }),
            TraceEntry::new(session, 1, TracePhase::Iterate, "question", "```clojure\n(undefined-fn)\n```")
                .with_code(Some("(undefined-fn)".to_string()))
                .with_outcome(ExecutionOutcome::Error {
                    message: "unbound symbol: undefined-fn".to_string(),
                    stdout: String::new(),
                }),
            TraceEntry::new(session, 2, TracePhase::Iterate, "=> error", "(FINAL [\"Acme Corp\"])")
                .with_code(Some("(FINAL [\"Acme Corp\"])".to_string()))
                .with_outcome(ExecutionOutcome::Final {
                    value: Value::from(vec!["Acme Corp"]),
                    stdout: "checking\n".to_string(),
                })
                .with_label("selection"),
            TraceEntry::new(session, 2, TracePhase::Refine, "decompose", "[]"),
        ]
    }

    #[test]
    fn test_render_default() {
        let text = render_trace(&entries(), &RenderOptions::default());
        assert!(text.contains("[plan #0]"));
        assert!(text.contains("error: unbound symbol: undefined-fn"));
        assert!(text.contains("[iterate #2] (selection)"));
        assert!(text.contains("FINAL [\"Acme Corp\"]"));
        assert!(text.contains("stdout:\n    checking"));
        assert!(!text.contains("prompt:"));
    }

    #[test]
    fn test_render_phase_filter() {
        let options = RenderOptions {
            phases: Some(vec![TracePhase::Refine]),
            ..RenderOptions::default()
        };
        let text = render_trace(&entries(), &options);
        assert!(text.contains("[refine #2]"));
        assert!(!text.contains("[iterate"));
    }

    #[test]
    fn test_render_clips_long_fields() {
        let session = new_entity_id();
        let long = TraceEntry::new(session, 1, TracePhase::Iterate, "q", "x".repeat(1_000));
        let options = RenderOptions {
            max_chars: 50,
            ..RenderOptions::default()
        };
        let text = render_trace(&[long], &options);
        assert!(text.contains(&format!("{}...", "x".repeat(50))));
        assert!(!text.contains(&"x".repeat(51)));

        let verbose = render_trace(&entries(), &RenderOptions::verbose());
        assert!(verbose.contains("prompt:\n    question"));
    }
}
