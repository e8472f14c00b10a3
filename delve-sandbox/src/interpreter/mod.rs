//! Fuel-bounded tree-walking evaluator.
//!
//! The interpreter has no ambient authority: the only things code can reach
//! are its own bindings, the pure builtins and whatever the
//! `CapabilityRegistry` exposes. Every evaluation step costs one unit of
//! fuel, every produced value is billed for its size and rejected once it
//! passes the value limits, and nesting is capped, so a single evaluation
//! always terminates in bounded memory.

pub mod builtins;
mod higher_order;
pub mod size;

use crate::parser::{Form, FormKind};
use crate::registry::{Binding, CapabilityRegistry};
use delve_core::{SandboxError, SandboxLimits, Value};
use size::Footprint;
use std::collections::HashMap;
use std::sync::Arc;

/// Forms evaluated by the interpreter itself rather than called.
pub const SPECIAL_FORMS: &[&str] = &[
    "def", "defn", "let", "fn", "if", "if-let", "when", "when-not", "when-let", "cond", "do",
    "and", "or", "quote", "doseq", "for", "->", "->>", "PLAN", "FINAL", "FINAL-VAR",
];

// ============================================================================
// OBJECTS AND SCOPES
// ============================================================================

/// A user-defined function with its captured scope.
#[derive(Debug)]
pub struct Lambda {
    pub name: Option<String>,
    params: Vec<Form>,
    rest: Option<Form>,
    body: Vec<Form>,
    scope: Scope,
}

/// Anything a symbol can be bound to. Collections only ever hold `Data`.
#[derive(Debug, Clone)]
pub enum Object {
    Data(Value),
    Lambda(Arc<Lambda>),
    Builtin(&'static str),
    Capability(String),
}

impl Object {
    pub fn nil() -> Self {
        Self::Data(Value::Null)
    }

    fn is_truthy(&self) -> bool {
        match self {
            Self::Data(v) => v.is_truthy(),
            _ => true,
        }
    }

    fn function_name(&self) -> Option<String> {
        match self {
            Self::Data(_) => None,
            Self::Lambda(l) => Some(l.name.clone().unwrap_or_else(|| "fn".to_string())),
            Self::Builtin(name) => Some(name.to_string()),
            Self::Capability(name) => Some(name.clone()),
        }
    }

    /// Value for display. Functions render as `#function[name]`.
    pub fn to_value_lossy(&self) -> Value {
        match self {
            Self::Data(v) => v.clone(),
            other => Value::String(format!(
                "#function[{}]",
                other.function_name().unwrap_or_default()
            )),
        }
    }
}

/// Require plain data, e.g. before storing into a collection.
pub fn into_data(object: Object, context: &str) -> Result<Value, SandboxError> {
    match object {
        Object::Data(v) => Ok(v),
        other => Err(SandboxError::Type {
            name: context.to_string(),
            message: format!(
                "function {} cannot be used as data",
                other.function_name().unwrap_or_default()
            ),
        }),
    }
}

/// Lexical scope: an immutable chain of frames.
#[derive(Debug, Clone, Default)]
pub struct Scope(Option<Arc<Frame>>);

#[derive(Debug)]
struct Frame {
    bindings: Vec<(String, Object)>,
    parent: Scope,
}

impl Scope {
    fn lookup(&self, name: &str) -> Option<&Object> {
        let mut current = self.0.as_deref();
        while let Some(frame) = current {
            if let Some((_, object)) = frame.bindings.iter().rev().find(|(n, _)| n == name) {
                return Some(object);
            }
            current = frame.parent.0.as_deref();
        }
        None
    }

    fn extend(&self, bindings: Vec<(String, Object)>) -> Scope {
        if bindings.is_empty() {
            return self.clone();
        }
        Scope(Some(Arc::new(Frame {
            bindings,
            parent: self.clone(),
        })))
    }
}

/// Non-local exits: an evaluation error, or a `FINAL` unwinding to the top.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Error(SandboxError),
    Final(Value),
}

impl From<SandboxError> for Signal {
    fn from(err: SandboxError) -> Self {
        Signal::Error(err)
    }
}

pub type EvalResult<T> = Result<T, Signal>;

/// `def` bindings that outlive a single evaluation.
pub type Globals = HashMap<String, Object>;

fn syntax(form: &Form, message: impl Into<String>) -> SandboxError {
    SandboxError::Syntax {
        line: form.span.line,
        column: form.span.column,
        message: message.into(),
    }
}

// ============================================================================
// INTERPRETER
// ============================================================================

pub struct Interpreter<'a> {
    registry: &'a CapabilityRegistry,
    globals: &'a mut Globals,
    limits: &'a SandboxLimits,
    fuel_left: u64,
    depth: usize,
    stdout: String,
    dropped_chars: usize,
    plan: Option<String>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        registry: &'a CapabilityRegistry,
        globals: &'a mut Globals,
        limits: &'a SandboxLimits,
    ) -> Self {
        Self {
            registry,
            globals,
            limits,
            fuel_left: limits.fuel,
            depth: 0,
            stdout: String::new(),
            dropped_chars: 0,
            plan: None,
        }
    }

    pub fn fuel_used(&self) -> u64 {
        self.limits.fuel - self.fuel_left
    }

    pub fn take_plan(&mut self) -> Option<String> {
        self.plan.take()
    }

    /// Captured stdout, with a marker if the cap was hit.
    pub fn take_stdout(&mut self) -> String {
        let mut out = std::mem::take(&mut self.stdout);
        if self.dropped_chars > 0 {
            out.push_str(&format!("\n... [truncated {} chars]", self.dropped_chars));
            self.dropped_chars = 0;
        }
        out
    }

    fn charge(&mut self, amount: u64) -> Result<(), SandboxError> {
        if amount > self.fuel_left {
            self.fuel_left = 0;
            return Err(SandboxError::FuelExhausted {
                fuel: self.limits.fuel,
            });
        }
        self.fuel_left -= amount;
        Ok(())
    }

    /// Bill a produced value for its size and reject it if it passes the
    /// value limits.
    fn admit(&mut self, value: Value) -> Result<Value, SandboxError> {
        let size = size::footprint(&value, self.limits);
        size.check(self.limits)?;
        self.charge(size.fuel())?;
        Ok(value)
    }

    /// Add one element to the running size of a collection under construction.
    fn accumulate(&self, total: &mut Footprint, value: &Value) -> Result<(), SandboxError> {
        let size = size::footprint(value, self.limits);
        total.chars = total.chars.saturating_add(size.chars);
        total.elements = total.elements.saturating_add(size.elements + 1);
        total.depth = total.depth.max(size.depth + 1);
        total.check(self.limits)
    }

    fn emit(&mut self, text: &str) {
        let room = self.limits.max_output_chars.saturating_sub(self.stdout.len());
        if text.len() <= room {
            self.stdout.push_str(text);
            return;
        }
        let mut cut = room;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.stdout.push_str(&text[..cut]);
        self.dropped_chars += text.len() - cut;
    }

    /// Evaluate one form.
    pub fn eval(&mut self, form: &Form, scope: &Scope) -> EvalResult<Object> {
        self.charge(1)?;
        if self.depth >= self.limits.max_depth {
            return Err(SandboxError::DepthExceeded {
                depth: self.limits.max_depth,
            }
            .into());
        }
        self.depth += 1;
        let result = self.eval_inner(form, scope);
        self.depth -= 1;
        result
    }

    fn eval_data(&mut self, form: &Form, scope: &Scope, context: &str) -> EvalResult<Value> {
        let object = self.eval(form, scope)?;
        Ok(into_data(object, context)?)
    }

    fn eval_inner(&mut self, form: &Form, scope: &Scope) -> EvalResult<Object> {
        match &form.kind {
            FormKind::Nil => Ok(Object::nil()),
            FormKind::Bool(b) => Ok(Object::Data(Value::Bool(*b))),
            FormKind::Number(n) => Ok(Object::Data(Value::Number(*n))),
            FormKind::Str(s) => Ok(Object::Data(Value::String(s.clone()))),
            FormKind::Keyword(k) => Ok(Object::Data(Value::String(k.clone()))),
            FormKind::Symbol(name) => Ok(self.resolve(name, scope)?),
            FormKind::Quote(inner) => Ok(Object::Data(self.admit(quote_value(inner))?)),
            FormKind::Vector(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_data(item, scope, "vector")?);
                }
                Ok(Object::Data(self.admit(Value::List(values))?))
            }
            FormKind::Map(entries) => {
                let mut map = std::collections::BTreeMap::new();
                for (k, v) in entries {
                    let key = self.eval_data(k, scope, "map")?;
                    let value = self.eval_data(v, scope, "map")?;
                    map.insert(builtins::key_string(&key), value);
                }
                Ok(Object::Data(self.admit(Value::Map(map))?))
            }
            FormKind::List(items) => self.eval_list(items, scope),
        }
    }

    fn resolve(&self, name: &str, scope: &Scope) -> Result<Object, SandboxError> {
        if let Some(object) = scope.lookup(name) {
            return Ok(object.clone());
        }
        if let Some(object) = self.globals.get(name) {
            return Ok(object.clone());
        }
        if let Some(entry) = self.registry.get(name) {
            return Ok(match &entry.binding {
                Binding::Function(_) => Object::Capability(name.to_string()),
                Binding::Constant(value) => Object::Data(value.clone()),
            });
        }
        if let Some(builtin) = builtins::canonical(name) {
            return Ok(Object::Builtin(builtin));
        }
        if SPECIAL_FORMS.contains(&name) {
            return Err(SandboxError::Type {
                name: name.to_string(),
                message: "is a special form and cannot be used as a value".to_string(),
            });
        }
        Err(SandboxError::UnboundSymbol {
            name: name.to_string(),
        })
    }

    fn eval_list(&mut self, items: &[Form], scope: &Scope) -> EvalResult<Object> {
        let Some((head, rest)) = items.split_first() else {
            return Ok(Object::Data(Value::List(Vec::new())));
        };

        if let Some(name) = head.as_symbol() {
            if SPECIAL_FORMS.contains(&name) {
                return self.eval_special(name, head, rest, scope);
            }
        }

        let callee = self.eval(head, scope)?;
        let mut args = Vec::with_capacity(rest.len());
        for arg in rest {
            args.push(self.eval(arg, scope)?);
        }
        self.call(&callee, args)
    }

    fn eval_body(&mut self, body: &[Form], scope: &Scope) -> EvalResult<Object> {
        let mut last = Object::nil();
        for form in body {
            last = self.eval(form, scope)?;
        }
        Ok(last)
    }

    // ========================================================================
    // SPECIAL FORMS
    // ========================================================================

    fn eval_special(
        &mut self,
        name: &str,
        head: &Form,
        args: &[Form],
        scope: &Scope,
    ) -> EvalResult<Object> {
        let arity = |min: usize, max: usize| builtins::check_arity(name, args.len(), min, max);
        match name {
            "def" => {
                arity(2, 3)?;
                let target = args[0]
                    .as_symbol()
                    .ok_or_else(|| syntax(&args[0], "def expects a symbol"))?;
                // (def name "doc" value)
                let value = self.eval(&args[args.len() - 1], scope)?;
                self.globals.insert(target.to_string(), value);
                Ok(Object::Data(Value::String(format!("#'{}", target))))
            }
            "defn" => {
                arity(2, usize::MAX)?;
                let target = args[0]
                    .as_symbol()
                    .ok_or_else(|| syntax(&args[0], "defn expects a symbol"))?;
                let mut rest = &args[1..];
                if matches!(rest.first().map(|f| &f.kind), Some(FormKind::Str(_))) {
                    rest = &rest[1..];
                }
                let lambda = make_lambda(Some(target.to_string()), head, rest, scope)?;
                self.globals.insert(target.to_string(), lambda);
                Ok(Object::Data(Value::String(format!("#'{}", target))))
            }
            "fn" => match args.first().and_then(Form::as_symbol) {
                Some(fn_name) => Ok(make_lambda(Some(fn_name.to_string()), head, &args[1..], scope)?),
                None => Ok(make_lambda(None, head, args, scope)?),
            },
            "let" => {
                arity(1, usize::MAX)?;
                let bindings = binding_vector(&args[0])?;
                let mut current = scope.clone();
                for pair in bindings.chunks(2) {
                    let value = self.eval(&pair[1], &current)?;
                    let mut bound = Vec::new();
                    self.bind_pattern(&pair[0], value, &mut bound)?;
                    current = current.extend(bound);
                }
                self.eval_body(&args[1..], &current)
            }
            "if" => {
                arity(2, 3)?;
                if self.eval(&args[0], scope)?.is_truthy() {
                    self.eval(&args[1], scope)
                } else if let Some(otherwise) = args.get(2) {
                    self.eval(otherwise, scope)
                } else {
                    Ok(Object::nil())
                }
            }
            "when" | "when-not" => {
                arity(1, usize::MAX)?;
                let test = self.eval(&args[0], scope)?.is_truthy();
                if test == (name == "when") {
                    self.eval_body(&args[1..], scope)
                } else {
                    Ok(Object::nil())
                }
            }
            "if-let" | "when-let" => {
                if name == "if-let" {
                    arity(2, 3)?;
                } else {
                    arity(1, usize::MAX)?;
                }
                let bindings = binding_vector(&args[0])?;
                if bindings.len() != 2 {
                    return Err(syntax(&args[0], format!("{} expects exactly one binding", name)).into());
                }
                let value = self.eval(&bindings[1], scope)?;
                if value.is_truthy() {
                    let mut bound = Vec::new();
                    self.bind_pattern(&bindings[0], value, &mut bound)?;
                    let inner = scope.extend(bound);
                    if name == "if-let" {
                        self.eval(&args[1], &inner)
                    } else {
                        self.eval_body(&args[1..], &inner)
                    }
                } else if name == "if-let" {
                    match args.get(2) {
                        Some(otherwise) => self.eval(otherwise, scope),
                        None => Ok(Object::nil()),
                    }
                } else {
                    Ok(Object::nil())
                }
            }
            "cond" => {
                if args.len() % 2 != 0 {
                    return Err(syntax(head, "cond requires an even number of forms").into());
                }
                for pair in args.chunks(2) {
                    if self.eval(&pair[0], scope)?.is_truthy() {
                        return self.eval(&pair[1], scope);
                    }
                }
                Ok(Object::nil())
            }
            "do" => self.eval_body(args, scope),
            "and" => {
                let mut last = Object::Data(Value::Bool(true));
                for form in args {
                    last = self.eval(form, scope)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            "or" => {
                let mut last = Object::nil();
                for form in args {
                    last = self.eval(form, scope)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            "quote" => {
                arity(1, 1)?;
                Ok(Object::Data(self.admit(quote_value(&args[0]))?))
            }
            "doseq" | "for" => {
                arity(1, usize::MAX)?;
                let bindings = binding_vector(&args[0])?;
                let mut collected = (name == "for").then(|| (Vec::new(), Footprint::default()));
                self.comprehend(bindings, scope, &args[1..], &mut collected)?;
                match collected {
                    Some((items, _)) => Ok(Object::Data(self.admit(Value::List(items))?)),
                    None => Ok(Object::nil()),
                }
            }
            "->" | "->>" => {
                arity(1, usize::MAX)?;
                let mut acc = args[0].clone();
                for step in &args[1..] {
                    let kind = match &step.kind {
                        FormKind::List(items) if !items.is_empty() => {
                            let mut items = items.clone();
                            if name == "->>" {
                                items.push(acc);
                            } else {
                                items.insert(1, acc);
                            }
                            FormKind::List(items)
                        }
                        _ => FormKind::List(vec![step.clone(), acc]),
                    };
                    acc = Form::new(kind, step.span);
                }
                self.eval(&acc, scope)
            }
            "PLAN" => {
                arity(1, usize::MAX)?;
                let mut parts = Vec::with_capacity(args.len());
                for form in args {
                    parts.push(self.eval_data(form, scope, "PLAN")?.to_string());
                }
                self.plan = Some(parts.join("\n"));
                Ok(Object::nil())
            }
            "FINAL" => {
                arity(1, 1)?;
                let value = self.eval_data(&args[0], scope, "FINAL")?;
                Err(Signal::Final(value))
            }
            "FINAL-VAR" => {
                arity(1, 1)?;
                let var = match &args[0].kind {
                    FormKind::Symbol(s) | FormKind::Str(s) | FormKind::Keyword(s) => s.clone(),
                    _ => {
                        return Err(syntax(&args[0], "FINAL-VAR expects a variable name").into())
                    }
                };
                let value = into_data(self.resolve(&var, scope)?, "FINAL-VAR")?;
                Err(Signal::Final(value))
            }
            _ => Err(SandboxError::UnboundSymbol {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Shared body of `doseq` and `for`, including `:when` and `:let`.
    fn comprehend(
        &mut self,
        bindings: &[Form],
        scope: &Scope,
        body: &[Form],
        out: &mut Option<(Vec<Value>, Footprint)>,
    ) -> EvalResult<()> {
        let Some((first, after)) = bindings.split_first() else {
            let value = self.eval_body(body, scope)?;
            if let Some((items, total)) = out {
                let value = into_data(value, "for")?;
                self.accumulate(total, &value)?;
                items.push(value);
            }
            return Ok(());
        };
        let Some((second, remaining)) = after.split_first() else {
            return Err(syntax(first, "binding vector requires an even number of forms").into());
        };

        match &first.kind {
            FormKind::Keyword(k) if k == "when" => {
                if self.eval(second, scope)?.is_truthy() {
                    self.comprehend(remaining, scope, body, out)?;
                }
                Ok(())
            }
            FormKind::Keyword(k) if k == "let" => {
                let pairs = binding_vector(second)?;
                let mut current = scope.clone();
                for pair in pairs.chunks(2) {
                    let value = self.eval(&pair[1], &current)?;
                    let mut bound = Vec::new();
                    self.bind_pattern(&pair[0], value, &mut bound)?;
                    current = current.extend(bound);
                }
                self.comprehend(remaining, &current, body, out)
            }
            _ => {
                let coll = self.eval_data(second, scope, "doseq")?;
                for item in builtins::seq_items("doseq", &coll)? {
                    let mut bound = Vec::new();
                    self.bind_pattern(first, Object::Data(item), &mut bound)?;
                    self.comprehend(remaining, &scope.extend(bound), body, out)?;
                }
                Ok(())
            }
        }
    }

    fn bind_pattern(
        &self,
        pattern: &Form,
        value: Object,
        out: &mut Vec<(String, Object)>,
    ) -> Result<(), SandboxError> {
        match &pattern.kind {
            FormKind::Symbol(name) => {
                out.push((name.clone(), value));
                Ok(())
            }
            FormKind::Vector(parts) => {
                let items = builtins::seq_items("destructure", &into_data(value, "destructure")?)?;
                for (i, part) in parts.iter().enumerate() {
                    if part.as_symbol() == Some("&") {
                        let rest = parts
                            .get(i + 1)
                            .ok_or_else(|| syntax(part, "expected a binding after &"))?;
                        let tail = items.get(i..).map(<[Value]>::to_vec).unwrap_or_default();
                        return self.bind_pattern(rest, Object::Data(Value::List(tail)), out);
                    }
                    let item = items.get(i).cloned().unwrap_or_default();
                    self.bind_pattern(part, Object::Data(item), out)?;
                }
                Ok(())
            }
            FormKind::Map(entries) => {
                let data = into_data(value, "destructure")?;
                for (k, v) in entries {
                    match (&k.kind, &v.kind) {
                        (FormKind::Keyword(kw), FormKind::Vector(names))
                            if kw == "keys" || kw == "strs" =>
                        {
                            for n in names {
                                let name = n
                                    .as_symbol()
                                    .ok_or_else(|| syntax(n, ":keys expects symbols"))?;
                                let found = builtins::get(&data, &Value::from(name));
                                out.push((name.to_string(), Object::Data(found)));
                            }
                        }
                        (FormKind::Keyword(kw), FormKind::Symbol(name)) if kw == "as" => {
                            out.push((name.clone(), Object::Data(data.clone())));
                        }
                        (FormKind::Symbol(name), FormKind::Keyword(key)) => {
                            let found = builtins::get(&data, &Value::from(key.as_str()));
                            out.push((name.clone(), Object::Data(found)));
                        }
                        _ => return Err(syntax(k, "unsupported map destructuring")),
                    }
                }
                Ok(())
            }
            _ => Err(syntax(
                pattern,
                format!("cannot bind to a {}", pattern.describe()),
            )),
        }
    }

    // ========================================================================
    // CALLS
    // ========================================================================

    /// Apply a callable object to evaluated arguments.
    pub(crate) fn call(&mut self, callee: &Object, args: Vec<Object>) -> EvalResult<Object> {
        match callee {
            Object::Lambda(lambda) => self.call_lambda(lambda, args),
            Object::Builtin(name) if builtins::HIGHER_ORDER.contains(name) => {
                match self.call_higher_order(name, args)? {
                    Object::Data(value) => Ok(Object::Data(self.admit(value)?)),
                    other => Ok(other),
                }
            }
            Object::Builtin(name) => {
                let values = data_args(name, args)?;
                if builtins::OUTPUT.contains(name) {
                    // values are size-capped already; no joined copy of the line
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            self.emit(" ");
                        }
                        self.emit(&value.to_string());
                    }
                    if *name == "println" {
                        self.emit("\n");
                    }
                    return Ok(Object::nil());
                }
                if let Some(n) = builtins::produced_len(name, &values) {
                    self.charge(n)?;
                }
                size::check_before_call(name, &values, self.limits)?;
                let result = builtins::call(name, &values)?;
                Ok(Object::Data(self.admit(result)?))
            }
            Object::Capability(name) => {
                let values = data_args(name, args)?;
                let result = self.registry.call(name, &values)?;
                Ok(Object::Data(self.admit(result)?))
            }
            // (:title page) and ({"a" 1} "a")
            Object::Data(key @ Value::String(_)) => {
                builtins::check_arity(&key.to_readable(), args.len(), 1, 2)?;
                let mut args = data_args("keyword lookup", args)?.into_iter();
                let coll = args.next().unwrap_or_default();
                let found = builtins::get(&coll, key);
                Ok(Object::Data(match (found, args.next()) {
                    (Value::Null, Some(default)) => default,
                    (found, _) => found,
                }))
            }
            Object::Data(map @ Value::Map(_)) => {
                builtins::check_arity("map lookup", args.len(), 1, 2)?;
                let mut args = data_args("map lookup", args)?.into_iter();
                let key = args.next().unwrap_or_default();
                let found = builtins::get(map, &key);
                Ok(Object::Data(match (found, args.next()) {
                    (Value::Null, Some(default)) => default,
                    (found, _) => found,
                }))
            }
            Object::Data(other) => {
                let mut shown = other.to_readable();
                shown.truncate(shown.char_indices().nth(40).map_or(shown.len(), |(i, _)| i));
                Err(SandboxError::Type {
                    name: shown,
                    message: format!("{} is not a function", other.type_name()),
                }
                .into())
            }
        }
    }

    fn call_lambda(&mut self, lambda: &Arc<Lambda>, args: Vec<Object>) -> EvalResult<Object> {
        let name = lambda.name.as_deref().unwrap_or("fn");
        let max = if lambda.rest.is_some() {
            usize::MAX
        } else {
            lambda.params.len()
        };
        builtins::check_arity(name, args.len(), lambda.params.len(), max)?;

        let mut bound = Vec::with_capacity(args.len());
        let mut args = args.into_iter();
        for param in &lambda.params {
            let arg = args.next().unwrap_or_else(Object::nil);
            self.bind_pattern(param, arg, &mut bound)?;
        }
        if let Some(rest) = &lambda.rest {
            let tail = args
                .map(|a| into_data(a, name))
                .collect::<Result<Vec<_>, _>>()?;
            let tail = if tail.is_empty() {
                Value::Null
            } else {
                Value::List(tail)
            };
            self.bind_pattern(rest, Object::Data(tail), &mut bound)?;
        }
        let scope = lambda.scope.extend(bound);
        self.eval_body(&lambda.body, &scope)
    }
}

fn data_args(name: &str, args: Vec<Object>) -> Result<Vec<Value>, SandboxError> {
    args.into_iter().map(|a| into_data(a, name)).collect()
}

fn binding_vector(form: &Form) -> Result<&[Form], SandboxError> {
    match &form.kind {
        FormKind::Vector(items) if items.len() % 2 == 0 => Ok(items),
        FormKind::Vector(_) => Err(syntax(form, "binding vector requires an even number of forms")),
        _ => Err(syntax(form, format!("expected a binding vector, got a {}", form.describe()))),
    }
}

fn make_lambda(
    name: Option<String>,
    head: &Form,
    rest: &[Form],
    scope: &Scope,
) -> Result<Object, SandboxError> {
    let Some((params_form, body)) = rest.split_first() else {
        return Err(syntax(head, "fn expects a parameter vector"));
    };
    let FormKind::Vector(all) = &params_form.kind else {
        return Err(syntax(params_form, "fn expects a parameter vector"));
    };

    let mut params = Vec::new();
    let mut variadic = None;
    let mut iter = all.iter();
    while let Some(param) = iter.next() {
        if param.as_symbol() == Some("&") {
            variadic = Some(
                iter.next()
                    .cloned()
                    .ok_or_else(|| syntax(param, "expected a parameter after &"))?,
            );
            break;
        }
        params.push(param.clone());
    }

    Ok(Object::Lambda(Arc::new(Lambda {
        name,
        params,
        rest: variadic,
        body: body.to_vec(),
        scope: scope.clone(),
    })))
}

/// Quoted forms become data: symbols read as strings.
fn quote_value(form: &Form) -> Value {
    match &form.kind {
        FormKind::Nil => Value::Null,
        FormKind::Bool(b) => Value::Bool(*b),
        FormKind::Number(n) => Value::Number(*n),
        FormKind::Str(s) | FormKind::Keyword(s) | FormKind::Symbol(s) => Value::String(s.clone()),
        FormKind::List(items) | FormKind::Vector(items) => {
            Value::List(items.iter().map(quote_value).collect())
        }
        FormKind::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (builtins::key_string(&quote_value(k)), quote_value(v)))
                .collect(),
        ),
        FormKind::Quote(inner) => Value::List(vec![Value::from("quote"), quote_value(inner)]),
    }
}
