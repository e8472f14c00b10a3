//! Error types for DELVE operations

use thiserror::Error;

/// Completion-service errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No completion provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Network error talking to {provider}: {message}")]
    Network { provider: String, message: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Gave up on {provider} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last_error: String,
    },
}

impl LlmError {
    /// Whether the failure is worth retrying at the call boundary.
    ///
    /// Rate limits, timeouts, network faults and 5xx responses are transient.
    /// Authentication and malformed responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Network { .. } => true,
            Self::RequestFailed { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Suggested delay before the next attempt, if the provider gave one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }
}

/// Configuration errors. Raised before any session starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Name {name} is reserved and cannot be registered")]
    ReservedName { name: String },

    #[error("Name {name} is already registered")]
    DuplicateName { name: String },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },
}

/// Memory store and trace persistence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Learning not found: {id}")]
    LearningNotFound { id: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupt record at {path}:{line}: {reason}")]
    CorruptRecord {
        path: String,
        line: usize,
        reason: String,
    },
}

/// Corpus collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorpusError {
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Table-of-contents entry not found: {id}")]
    TocEntryNotFound { id: String },

    #[error("Corpus does not accept ingestion")]
    ReadOnly,

    #[error("Invalid document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },
}

/// Output-schema errors produced by the schema collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Expected {expected} at {path}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Missing required field {path}")]
    MissingField { path: String },

    #[error("Unexpected field {path}")]
    UnexpectedField { path: String },

    #[error("Value at {path} is not one of {allowed:?}")]
    NotAllowed { path: String, allowed: Vec<String> },

    #[error("Could not parse model output as JSON: {reason}")]
    InvalidJson { reason: String },
}

/// Errors raised while evaluating code inside the sandbox.
///
/// These never leave a session: the Query Loop renders them into the next
/// iteration's observation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Unable to resolve symbol: {name}")]
    UnboundSymbol { name: String },

    #[error("{name}: expected {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("{name}: {message}")]
    Type { name: String, message: String },

    #[error("{name} failed: {message}")]
    Capability { name: String, message: String },

    #[error("Evaluation ran out of fuel after {fuel} steps")]
    FuelExhausted { fuel: u64 },

    #[error("Maximum nesting depth of {depth} exceeded")]
    DepthExceeded { depth: usize },

    #[error("Value exceeds the limit of {limit} {measure}")]
    ValueTooLarge { measure: String, limit: u64 },

    #[error("{message}")]
    Runtime { message: String },
}

/// Query-level faults that abort a single session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Environment has been disposed")]
    EnvironmentDisposed,

    #[error("Session deadline of {deadline_ms}ms exceeded after {iterations} iteration(s)")]
    DeadlineExceeded { deadline_ms: u64, iterations: u32 },

    #[error("Question rejected by input guard: {reason}")]
    InputRejected { reason: String },

    #[error("Completion failed during {phase}: {reason}")]
    Collaborator { phase: String, reason: String },
}

/// Q&A pipeline errors, scoped to a phase.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Phase {phase} failed: {reason}")]
    PhaseFailed { phase: String, reason: String },

    #[error("Phase {phase} produced no usable output")]
    EmptyPhase { phase: String },
}

/// Master error type for all DELVE errors.
#[derive(Debug, Clone, Error)]
pub enum DelveError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Result type alias for DELVE operations.
pub type DelveResult<T> = Result<T, DelveError>;

// =============================================================================
// TESTS
// =============================================================================
