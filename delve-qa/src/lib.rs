//! DELVE Q&A - Dataset Generation Pipeline
//!
//! Builds a question/answer dataset from an environment's corpus by running
//! four phases, each a set of ordinary query sessions:
//!
//! ```text
//! Selection      pick ≥ count × oversample passages (up to N rounds)
//!     ↓
//! Generation     batches of passages → records, bounded concurrency
//!     ↓
//! Verification   verdict per record; only `pass` survives (+ revision hook)
//!     ↓
//! Deduplication  exact collapse, then a keep-set session (fail-safe)
//!     ↓
//! QaResult { questions, stats, trace }
//! ```

pub mod allocate;
pub mod dedup;
pub mod options;
pub mod pipeline;
pub mod prompts;
pub mod result;

pub use allocate::{allocate, assign_slots};
pub use options::QaOptions;
pub use pipeline::{generate_qa, QaPipeline, RevisionHook};
pub use result::{PhaseCounts, QaResult, QaStats};
