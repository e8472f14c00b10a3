//! Per-session conversation with budget trimming.
//!
//! The opening user turn (question, caller context, plan) is essential and
//! never dropped. Each iteration adds one exchange: the model's response and
//! the observation fed back. When the budget is exceeded the oldest
//! exchanges go first; the newest exchange is always kept.

use crate::estimate_tokens;
use delve_llm::Message;
use serde::{Deserialize, Serialize};

/// One iteration: what the model said and what it observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub response: String,
    pub observation: String,
}

impl Exchange {
    fn tokens(&self) -> usize {
        estimate_tokens(&self.response) + estimate_tokens(&self.observation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    question: String,
    context: Option<String>,
    plan: Option<String>,
    /// Extra essential notes appended to the opening turn (e.g. corrective feedback).
    notes: Vec<String>,
    exchanges: Vec<Exchange>,
    dropped: usize,
}

impl Conversation {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: None,
            plan: None,
            notes: Vec::new(),
            exchanges: Vec::new(),
            dropped: 0,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        if !context.trim().is_empty() {
            self.context = Some(context);
        }
        self
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    /// Set the plan shown with every later turn. Replaces any earlier plan.
    pub fn set_plan(&mut self, plan: impl Into<String>) {
        self.plan = Some(plan.into());
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn push_exchange(&mut self, response: impl Into<String>, observation: impl Into<String>) {
        self.exchanges.push(Exchange {
            response: response.into(),
            observation: observation.into(),
        });
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Number of exchanges removed by trimming so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Opening turn without the omitted-iterations note.
    fn opening_base(&self) -> String {
        let mut out = format!("Question: {}", self.question);
        if let Some(context) = &self.context {
            out.push_str("\n\nContext:\n");
            out.push_str(context);
        }
        if let Some(plan) = &self.plan {
            out.push_str("\n\nPlan (advisory):\n");
            out.push_str(plan);
        }
        for note in &self.notes {
            out.push_str("\n\n");
            out.push_str(note);
        }
        out
    }

    fn omitted_note(dropped: usize) -> String {
        if dropped == 0 {
            return String::new();
        }
        format!(
            "\n\n({} earlier iteration(s) omitted to fit the context budget.)",
            dropped
        )
    }

    fn opening(&self) -> String {
        let mut out = self.opening_base();
        out.push_str(&Self::omitted_note(self.dropped));
        out
    }

    /// Estimated tokens of the rendered conversation.
    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.opening_base())
            + estimate_tokens(&Self::omitted_note(self.dropped))
            + self.exchanges.iter().map(Exchange::tokens).sum::<usize>()
    }

    /// Drop the oldest exchanges until the conversation fits `budget`.
    /// Returns how many were dropped by this call.
    pub fn trim_to_budget(&mut self, budget: usize) -> usize {
        let base = estimate_tokens(&self.opening_base());
        let mut total: usize = self.exchanges.iter().map(Exchange::tokens).sum();
        let mut removed = 0;
        while self.exchanges.len() - removed > 1
            && base + estimate_tokens(&Self::omitted_note(self.dropped + removed)) + total > budget
        {
            total -= self.exchanges[removed].tokens();
            removed += 1;
        }
        self.exchanges.drain(..removed);
        self.dropped += removed;
        removed
    }

    /// Render as alternating user/assistant messages, ending with a user turn.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(1 + self.exchanges.len() * 2);
        messages.push(Message::user(self.opening()));
        for exchange in &self.exchanges {
            messages.push(Message::assistant(exchange.response.clone()));
            messages.push(Message::user(exchange.observation.clone()));
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_llm::Role;

    #[test]
    fn test_messages_alternate_and_end_with_user() {
        let mut conv = Conversation::new("List all parties").with_context("Lease corpus");
        conv.push_exchange("```clojure\n(list-documents)\n```", "=> [...]");
        conv.push_exchange("```clojure\n(bad\n```", "Error: unclosed list");
        let messages = conv.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].content.contains("List all parties"));
        assert!(messages[0].content.contains("Lease corpus"));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[4].role, Role::User);
    }

    #[test]
    fn test_blank_context_ignored() {
        let conv = Conversation::new("q").with_context("   ");
        assert!(!conv.messages()[0].content.contains("Context"));
    }

    #[test]
    fn test_plan_is_rendered_in_opening_turn() {
        let mut conv = Conversation::new("q");
        conv.set_plan("1. search\n2. finalize");
        assert!(conv.messages()[0].content.contains("Plan (advisory):\n1. search"));
        assert_eq!(conv.plan(), Some("1. search\n2. finalize"));
    }

    #[test]
    fn test_trim_drops_oldest_and_keeps_question_and_plan() {
        let mut conv = Conversation::new("What is the rent?");
        conv.set_plan("look at page 2");
        for i in 0..10 {
            conv.push_exchange(format!("response {} {}", i, "x".repeat(200)), format!("obs {}", i));
        }
        let removed = conv.trim_to_budget(200);
        assert!(removed > 0);
        assert_eq!(conv.dropped(), removed);
        assert!(conv.tokens() <= 200 || conv.exchanges().len() == 1);

        let opening = &conv.messages()[0].content;
        assert!(opening.contains("What is the rent?"));
        assert!(opening.contains("look at page 2"));
        assert!(opening.contains("omitted"));

        // newest exchange survives
        assert!(conv.exchanges().last().unwrap().observation == "obs 9");
    }

    #[test]
    fn test_trim_matches_token_estimate() {
        let mut conv = Conversation::new("q");
        for i in 0..200 {
            conv.push_exchange(format!("r{}", i), "o".repeat(i));
        }
        let removed = conv.trim_to_budget(2_000);
        assert_eq!(removed + conv.exchanges().len(), 200);
        assert!(conv.tokens() <= 2_000);

        // one more exchange back would not have fit
        let mut wider = Conversation::new("q");
        for i in (removed - 1)..200 {
            wider.push_exchange(format!("r{}", i), "o".repeat(i));
        }
        wider.dropped = removed - 1;
        assert!(wider.tokens() > 2_000);
    }

    #[test]
    fn test_trim_keeps_last_exchange_even_over_budget() {
        let mut conv = Conversation::new("q");
        conv.push_exchange("x".repeat(1000), "y".repeat(1000));
        assert_eq!(conv.trim_to_budget(1), 0);
        assert_eq!(conv.exchanges().len(), 1);
    }
}
