//! One sandbox per query session.

use crate::interpreter::{Globals, Interpreter, Scope, Signal};
use crate::parser::read;
use crate::registry::CapabilityRegistry;
use delve_core::{ExecutionOutcome, SandboxError, SandboxLimits, Value};

/// What one `execute` call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Value of the last evaluated form (nil on error).
    pub value: Value,
    pub stdout: String,
    pub error: Option<SandboxError>,
    /// Set when the code called `FINAL` or `FINAL-VAR`.
    pub final_value: Option<Value>,
    /// Set when the code called `PLAN`.
    pub plan: Option<String>,
    pub fuel_used: u64,
}

impl ExecutionResult {
    fn failed(error: SandboxError) -> Self {
        Self {
            value: Value::Null,
            stdout: String::new(),
            error: Some(error),
            final_value: None,
            plan: None,
            fuel_used: 0,
        }
    }

    pub fn is_final(&self) -> bool {
        self.final_value.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Trace outcome for this execution.
    pub fn outcome(&self) -> ExecutionOutcome {
        if let Some(value) = &self.final_value {
            return ExecutionOutcome::Final {
                value: value.clone(),
                stdout: self.stdout.clone(),
            };
        }
        if let Some(err) = &self.error {
            return ExecutionOutcome::Error {
                message: err.to_string(),
                stdout: self.stdout.clone(),
            };
        }
        if let Some(text) = &self.plan {
            return ExecutionOutcome::Plan {
                text: text.clone(),
                stdout: self.stdout.clone(),
            };
        }
        ExecutionOutcome::Value {
            value: self.value.clone(),
            stdout: self.stdout.clone(),
        }
    }
}

/// Isolated evaluation context.
///
/// `def` bindings persist between `execute` calls on the same sandbox and
/// nowhere else. Each call gets a fresh fuel budget.
pub struct Sandbox {
    registry: CapabilityRegistry,
    limits: SandboxLimits,
    globals: Globals,
}

impl Sandbox {
    pub fn new(registry: CapabilityRegistry, limits: SandboxLimits) -> Self {
        Self {
            registry,
            limits,
            globals: Globals::new(),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Names bound with `def`/`defn` so far.
    pub fn defined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.globals.keys().cloned().collect();
        names.sort();
        names
    }

    /// Evaluate `code`. Never fails: syntax and runtime errors are reported
    /// in the result. Evaluation stops at the first error or `FINAL`.
    pub fn execute(&mut self, code: &str) -> ExecutionResult {
        let forms = match read(code) {
            Ok(forms) => forms,
            Err(err) => return ExecutionResult::failed(err.into()),
        };

        let mut interpreter = Interpreter::new(&self.registry, &mut self.globals, &self.limits);
        let scope = Scope::default();
        let mut value = Value::Null;
        let mut error = None;
        let mut final_value = None;

        for form in &forms {
            match interpreter.eval(form, &scope) {
                Ok(object) => value = object.to_value_lossy(),
                Err(Signal::Final(v)) => {
                    final_value = Some(v);
                    break;
                }
                Err(Signal::Error(err)) => {
                    value = Value::Null;
                    error = Some(err);
                    break;
                }
            }
        }

        ExecutionResult {
            value,
            stdout: interpreter.take_stdout(),
            error,
            final_value,
            plan: interpreter.take_plan(),
            fuel_used: interpreter.fuel_used(),
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("capabilities", &self.registry.len())
            .field("limits", &self.limits)
            .field("globals", &self.defined_names())
            .finish()
    }
}
