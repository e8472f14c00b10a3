//! Named capabilities visible to sandbox code.

use crate::interpreter::{builtins, SPECIAL_FORMS};
use delve_core::{ConfigError, DelveError, DelveResult, SandboxError, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Host function callable from sandbox code.
///
/// Capabilities see only the argument values; failures are returned as a
/// message and surface to model code as `SandboxError::Capability`.
pub type CapabilityFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Names the engine binds for every session. Callers may not register these.
pub const RESERVED_CAPABILITIES: &[&str] = &[
    "list-documents",
    "get-document",
    "search-pages",
    "list-toc",
    "search-toc",
    "get-toc",
    "search-entities",
    "list-relationships",
    "search-learnings",
    "search-history",
    "cite!",
    "learn!",
    "vote!",
    "remember!",
];

/// Whether `name` is taken by the language itself or the engine.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_CAPABILITIES.contains(&name)
        || SPECIAL_FORMS.contains(&name)
        || builtins::canonical(name).is_some()
        || matches!(name, "nil" | "true" | "false")
}

#[derive(Clone)]
pub enum Binding {
    Function(CapabilityFn),
    Constant(Value),
}

/// Who provided a capability, used to group prompt documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CapabilityKind {
    /// Read-only access to corpus and memory
    Read,
    /// Append-only writes
    Write,
    /// Registered by the caller
    Caller,
}

#[derive(Clone)]
pub struct CapabilityEntry {
    pub name: String,
    pub doc: String,
    pub kind: CapabilityKind,
    pub binding: Binding,
}

impl fmt::Debug for CapabilityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = match &self.binding {
            Binding::Function(_) => "function".to_string(),
            Binding::Constant(v) => v.to_readable(),
        };
        f.debug_struct("CapabilityEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("binding", &binding)
            .finish()
    }
}

/// Registry of host functions and constants.
///
/// Cloning is cheap: functions are shared behind `Arc`.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, CapabilityEntry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a caller-supplied function.
    ///
    /// # Errors
    /// `ConfigError::ReservedName` for builtins, special forms and engine
    /// capabilities; `ConfigError::DuplicateName` if already registered.
    pub fn register_function<F>(&mut self, name: &str, doc: &str, f: F) -> DelveResult<()>
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.check_name(name)?;
        self.insert(name, doc, CapabilityKind::Caller, Binding::Function(Arc::new(f)));
        Ok(())
    }

    /// Register a caller-supplied constant. Same naming rules as functions.
    pub fn register_constant(&mut self, name: &str, value: Value, doc: &str) -> DelveResult<()> {
        self.check_name(name)?;
        self.insert(name, doc, CapabilityKind::Caller, Binding::Constant(value));
        Ok(())
    }

    /// Bind an engine capability, replacing any previous binding of `name`.
    /// Bypasses the reserved-name check.
    pub fn install_capability(&mut self, name: &str, doc: &str, kind: CapabilityKind, f: CapabilityFn) {
        self.insert(name, doc, kind, Binding::Function(f));
    }

    fn insert(&mut self, name: &str, doc: &str, kind: CapabilityKind, binding: Binding) {
        self.entries.insert(
            name.to_string(),
            CapabilityEntry {
                name: name.to_string(),
                doc: doc.to_string(),
                kind,
                binding,
            },
        );
    }

    fn check_name(&self, name: &str) -> DelveResult<()> {
        let valid = !name.is_empty()
            && !name.starts_with(':')
            && !name.chars().any(|c| c.is_whitespace() || "()[]{}\"';,".contains(c));
        if !valid {
            return Err(DelveError::Config(ConfigError::InvalidValue {
                field: "name".to_string(),
                value: name.to_string(),
                reason: "not a valid symbol".to_string(),
            }));
        }
        if is_reserved(name) {
            return Err(DelveError::Config(ConfigError::ReservedName {
                name: name.to_string(),
            }));
        }
        if self.entries.contains_key(name) {
            return Err(DelveError::Config(ConfigError::DuplicateName {
                name: name.to_string(),
            }));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Call a function capability.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, SandboxError> {
        match self.entries.get(name).map(|e| &e.binding) {
            Some(Binding::Function(f)) => f(args).map_err(|message| SandboxError::Capability {
                name: name.to_string(),
                message,
            }),
            Some(Binding::Constant(_)) => Err(SandboxError::Type {
                name: name.to_string(),
                message: "is a constant, not a function".to_string(),
            }),
            None => Err(SandboxError::UnboundSymbol {
                name: name.to_string(),
            }),
        }
    }

    /// Prompt documentation, grouped by kind.
    pub fn describe(&self) -> String {
        let mut entries: Vec<&CapabilityEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));

        let mut out = String::new();
        let mut current = None;
        for entry in entries {
            if current != Some(entry.kind) {
                if current.is_some() {
                    out.push('\n');
                }
                out.push_str(match entry.kind {
                    CapabilityKind::Read => "Read functions:\n",
                    CapabilityKind::Write => "Write functions (append-only):\n",
                    CapabilityKind::Caller => "Caller-provided:\n",
                });
                current = Some(entry.kind);
            }
            let doc = if entry.doc.is_empty() { "(undocumented)" } else { &entry.doc };
            match &entry.binding {
                Binding::Function(_) => out.push_str(&format!("- {} : {}\n", entry.name, doc)),
                Binding::Constant(v) => out.push_str(&format!(
                    "- {} (constant, {}) : {}\n",
                    entry.name,
                    v.type_name(),
                    doc
                )),
            }
        }
        out
    }
}
