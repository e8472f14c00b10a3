//! DELVE Engine - Recursive Query Engine
//!
//! Drives a model through plan, code-execute, observe, refine and verify
//! cycles over a corpus that does not fit in its context window.
//!
//! Architecture:
//! ```text
//! Environment (corpus, memory, registry, trace, providers)
//!     ↓
//! query(question, options)
//!     ↓
//! INIT → [PLANNING] → ITERATING ⟲ → FINALIZED | EXHAUSTED
//!                        ↕
//!                     Sandbox (one per session)
//!     ↓
//! Refinement (decompose → verify → score → regenerate)
//!     ↓
//! Claim verification (CoVe)
//!     ↓
//! QueryResult { answer, status, trace, iterations, converged, score }
//! ```

pub mod capabilities;
pub mod environment;
pub mod extract;
pub mod options;
pub mod prompts;
pub mod query;
pub mod refine;
pub mod render;
mod session;
pub mod verify;

pub use capabilities::ClaimLog;
pub use environment::{Environment, EnvironmentBuilder};
pub use extract::extract_code;
pub use options::{QueryOptions, QueryResult, QueryStatus, RefinementRecord};
pub use refine::{score_checks, ClaimCheck};
pub use render::{print_trace, render_trace, RenderOptions};
pub use verify::parse_support;
