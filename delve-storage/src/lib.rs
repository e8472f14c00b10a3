//! DELVE Storage - Memory Store, Trace Recorder and Reference Corpus
//!
//! Everything here is append-only or read-mostly and safe to share across
//! concurrent query sessions behind an `Arc`:
//!
//! ```text
//! MemoryStore     history / learnings / votes, one RwLock per log
//!     |
//!     +-- persistence: JSON-lines load on create, rewrite on flush
//!
//! TraceRecorder   every model call of every session, never mutated
//!
//! InMemoryCorpus  reference `Corpus` implementation with `ingest`
//! ```

pub mod corpus;
pub mod memory;
pub mod persistence;
pub mod trace;

pub use corpus::InMemoryCorpus;
pub use memory::{query_terms, MemoryStore};
pub use persistence::MemoryRecord;
pub use trace::TraceRecorder;
