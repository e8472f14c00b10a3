//! DELVE Core - Data Types
//!
//! Pure data structures and collaborator contracts shared by every other
//! crate: identity, the sandbox `Value`, trace/claim/learning/Q&A entities,
//! configuration, the error taxonomy, and the corpus, schema and
//! post-processing traits.

pub mod config;
pub mod corpus;
pub mod entities;
pub mod error;
pub mod identity;
pub mod postprocess;
pub mod schema;
pub mod value;

pub use config::*;
pub use corpus::*;
pub use entities::*;
pub use error::*;
pub use identity::*;
pub use postprocess::*;
pub use schema::*;
pub use value::*;
