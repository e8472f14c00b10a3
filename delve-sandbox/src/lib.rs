//! DELVE Sandbox - Capability-Restricted Evaluation
//!
//! Model-written code runs here. The language is a small Clojure-flavoured
//! s-expression dialect; the only host access is through the named
//! capabilities in a [`CapabilityRegistry`].
//!
//! Architecture:
//! ```text
//! Source code
//!     ↓
//! Lexer (tokens with spans)
//!     ↓
//! Parser (forms)
//!     ↓
//! Interpreter (fuel, depth and stdout limits)
//!     ↓
//! ExecutionResult { value, stdout, error, final_value, plan }
//! ```

pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod sandbox;

pub use interpreter::{builtins::canonical as builtin_name, SPECIAL_FORMS};
pub use parser::{read, Form, FormKind, ParseError};
pub use registry::{
    is_reserved, CapabilityFn, CapabilityKind, CapabilityRegistry, RESERVED_CAPABILITIES,
};
pub use sandbox::{ExecutionResult, Sandbox};
