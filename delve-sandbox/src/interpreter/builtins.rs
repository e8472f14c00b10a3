//! Pure data builtins.
//!
//! Every function here maps argument values to a result value with no access
//! to the interpreter. Functions that take other functions as arguments live
//! in `higher_order.rs`; output functions live on the interpreter because
//! they write to the captured stdout.

use delve_core::{SandboxError, Value};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Compiled regex size cap.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

pub const PURE_BUILTINS: &[&str] = &[
    // arithmetic
    "+", "-", "*", "/", "mod", "rem", "quot", "inc", "dec", "max", "min", "abs", "round", "int",
    "double",
    // comparison and logic
    "=", "not=", "<", ">", "<=", ">=", "compare", "not", "identity", "type",
    // predicates
    "nil?", "some?", "string?", "number?", "map?", "vector?", "coll?", "boolean?", "true?",
    "false?", "zero?", "pos?", "neg?", "even?", "odd?", "empty?", "contains?", "blank?",
    // strings
    "str", "pr-str", "subs", "upper-case", "lower-case", "trim", "includes?", "starts-with?",
    "ends-with?", "split", "split-lines", "join", "replace", "re-find", "re-seq", "re-matches",
    "parse-long", "parse-double", "name", "keyword",
    // collections
    "count", "first", "second", "last", "rest", "next", "butlast", "nth", "get", "get-in",
    "assoc", "dissoc", "keys", "vals", "conj", "cons", "concat", "take", "drop", "take-last",
    "reverse", "sort", "distinct", "flatten", "range", "repeat", "vec", "into", "frequencies",
    "merge", "select-keys", "zipmap", "list", "vector", "hash-map", "partition", "partition-all",
    "interpose", "seq",
];

/// Builtins that call back into the interpreter.
pub const HIGHER_ORDER: &[&str] = &[
    "map",
    "map-indexed",
    "filter",
    "remove",
    "keep",
    "reduce",
    "sort-by",
    "group-by",
    "some",
    "every?",
    "mapcat",
    "apply",
    "take-while",
    "drop-while",
    "update",
];

/// Builtins that write to stdout.
pub const OUTPUT: &[&str] = &["println", "print"];

const NAMESPACES: &[&str] = &["clojure.string/", "string/", "str/", "s/"];

/// Resolve a symbol to the canonical builtin name, accepting
/// `clojure.string/` style prefixes.
pub fn canonical(name: &str) -> Option<&'static str> {
    let bare = NAMESPACES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);
    PURE_BUILTINS
        .iter()
        .chain(HIGHER_ORDER)
        .chain(OUTPUT)
        .find(|builtin| **builtin == bare)
        .copied()
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), SandboxError> {
    check_arity(name, args.len(), min, max)
}

/// Arity check shared with the interpreter. `usize::MAX` means variadic.
pub fn check_arity(name: &str, got: usize, min: usize, max: usize) -> Result<(), SandboxError> {
    if got < min || got > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("{}+", min)
        } else {
            format!("{}-{}", min, max)
        };
        return Err(SandboxError::Arity {
            name: name.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

fn type_error(name: &str, message: impl Into<String>) -> SandboxError {
    SandboxError::Type {
        name: name.to_string(),
        message: message.into(),
    }
}

fn num(name: &str, value: &Value) -> Result<f64, SandboxError> {
    value
        .as_f64()
        .ok_or_else(|| type_error(name, format!("expected number, got {}", value.type_name())))
}

fn int(name: &str, value: &Value) -> Result<i64, SandboxError> {
    value
        .as_i64()
        .ok_or_else(|| type_error(name, format!("expected integer, got {}", value.to_readable())))
}

fn index(name: &str, value: &Value) -> Result<usize, SandboxError> {
    let i = int(name, value)?;
    usize::try_from(i).map_err(|_| type_error(name, format!("negative index {}", i)))
}

fn string<'v>(name: &str, value: &'v Value) -> Result<&'v str, SandboxError> {
    value
        .as_str()
        .ok_or_else(|| type_error(name, format!("expected string, got {}", value.type_name())))
}

fn map(name: &str, value: &Value) -> Result<BTreeMap<String, Value>, SandboxError> {
    match value {
        Value::Map(m) => Ok(m.clone()),
        Value::Null => Ok(BTreeMap::new()),
        other => Err(type_error(name, format!("expected map, got {}", other.type_name()))),
    }
}

/// Items of anything sequable: lists, maps (as `[k v]` pairs), strings (as
/// one-character strings) and nil (empty).
pub fn seq_items(name: &str, value: &Value) -> Result<Vec<Value>, SandboxError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => Ok(items.clone()),
        Value::Map(m) => Ok(m
            .iter()
            .map(|(k, v)| Value::List(vec![Value::String(k.clone()), v.clone()]))
            .collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(type_error(
            name,
            format!("don't know how to iterate a {}", other.type_name()),
        )),
    }
}

/// Map keys are strings; keywords already evaluate to strings.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Total order used by `sort`, `sort-by` and `compare`.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::List(_) => 4,
            Value::Map(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::List(x), Value::List(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Map(_), Value::Map(_)) => a.to_readable().cmp(&b.to_readable()),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// `get` semantics shared with keyword and map application.
pub fn get(coll: &Value, key: &Value) -> Value {
    match coll {
        Value::Map(m) => m.get(&key_string(key)).cloned().unwrap_or_default(),
        Value::List(items) => key
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or_default(),
        Value::String(s) => key
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or_default(),
        _ => Value::Null,
    }
}

/// Number of elements `range` or `repeat` would produce, checked before
/// allocation so fuel can be charged up front.
pub fn produced_len(name: &str, args: &[Value]) -> Option<u64> {
    match name {
        "range" => {
            let nums: Vec<f64> = args.iter().filter_map(Value::as_f64).collect();
            let (start, end, step) = match nums.as_slice() {
                [end] => (0.0, *end, 1.0),
                [start, end] => (*start, *end, 1.0),
                [start, end, step] => (*start, *end, *step),
                _ => return None,
            };
            if step == 0.0 {
                return None;
            }
            let n = ((end - start) / step).ceil();
            Some(if n.is_finite() && n > 0.0 { n as u64 } else { 0 })
        }
        "repeat" => args.first().and_then(Value::as_i64).map(|n| n.max(0) as u64),
        _ => None,
    }
}

fn compile_regex(name: &str, pattern: &str) -> Result<Regex, SandboxError> {
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| type_error(name, format!("invalid regex: {}", e)))
}

fn match_value(re: &Regex, caps: &regex::Captures<'_>) -> Value {
    if re.captures_len() > 1 {
        Value::List(
            caps.iter()
                .map(|m| m.map(|m| Value::String(m.as_str().to_string())).unwrap_or_default())
                .collect(),
        )
    } else {
        caps.get(0)
            .map(|m| Value::String(m.as_str().to_string()))
            .unwrap_or_default()
    }
}

fn fold_numbers(
    name: &str,
    args: &[Value],
    init: f64,
    op: impl Fn(f64, f64) -> f64,
) -> Result<Value, SandboxError> {
    let mut acc = init;
    for arg in args {
        acc = op(acc, num(name, arg)?);
    }
    Ok(Value::Number(acc))
}

fn compare_chain(
    name: &str,
    args: &[Value],
    ok: impl Fn(f64, f64) -> bool,
) -> Result<Value, SandboxError> {
    arity(name, args, 1, usize::MAX)?;
    let nums = args
        .iter()
        .map(|a| num(name, a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Bool(nums.windows(2).all(|w| ok(w[0], w[1]))))
}

fn pairs_into(
    name: &str,
    target: &mut BTreeMap<String, Value>,
    items: Vec<Value>,
) -> Result<(), SandboxError> {
    for item in items {
        match item {
            Value::List(pair) if pair.len() == 2 => {
                target.insert(key_string(&pair[0]), pair[1].clone());
            }
            Value::Map(m) => target.extend(m),
            Value::Null => {}
            other => {
                return Err(type_error(
                    name,
                    format!("expected [key value] pair, got {}", other.to_readable()),
                ))
            }
        }
    }
    Ok(())
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::List(items) => items.into_iter().for_each(|v| flatten_into(v, out)),
        other => out.push(other),
    }
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Call a pure builtin by canonical name.
pub fn call(name: &str, args: &[Value]) -> Result<Value, SandboxError> {
    match name {
        // arithmetic
        "+" => fold_numbers(name, args, 0.0, |a, b| a + b),
        "*" => fold_numbers(name, args, 1.0, |a, b| a * b),
        "-" => {
            arity(name, args, 1, usize::MAX)?;
            let first = num(name, &args[0])?;
            if args.len() == 1 {
                return Ok(Value::Number(-first));
            }
            fold_numbers(name, &args[1..], first, |a, b| a - b)
        }
        "/" => {
            arity(name, args, 1, usize::MAX)?;
            let (mut acc, rest) = if args.len() == 1 {
                (1.0, args)
            } else {
                (num(name, &args[0])?, &args[1..])
            };
            for arg in rest {
                let d = num(name, arg)?;
                if d == 0.0 {
                    return Err(SandboxError::Runtime {
                        message: "Divide by zero".to_string(),
                    });
                }
                acc /= d;
            }
            Ok(Value::Number(acc))
        }
        "mod" | "rem" | "quot" => {
            arity(name, args, 2, 2)?;
            let a = num(name, &args[0])?;
            let b = num(name, &args[1])?;
            if b == 0.0 {
                return Err(SandboxError::Runtime {
                    message: "Divide by zero".to_string(),
                });
            }
            Ok(Value::Number(match name {
                "mod" => ((a % b) + b) % b,
                "rem" => a % b,
                _ => (a / b).trunc(),
            }))
        }
        "inc" | "dec" | "abs" | "round" | "int" | "double" => {
            arity(name, args, 1, 1)?;
            let n = num(name, &args[0])?;
            Ok(Value::Number(match name {
                "inc" => n + 1.0,
                "dec" => n - 1.0,
                "abs" => n.abs(),
                "round" => n.round(),
                "int" => n.trunc(),
                _ => n,
            }))
        }
        "max" | "min" => {
            arity(name, args, 1, usize::MAX)?;
            let mut best = num(name, &args[0])?;
            for arg in &args[1..] {
                let n = num(name, arg)?;
                best = if name == "max" { best.max(n) } else { best.min(n) };
            }
            Ok(Value::Number(best))
        }

        // comparison and logic
        "=" => {
            arity(name, args, 1, usize::MAX)?;
            Ok(Value::Bool(args.windows(2).all(|w| w[0] == w[1])))
        }
        "not=" => {
            arity(name, args, 1, usize::MAX)?;
            Ok(Value::Bool(!args.windows(2).all(|w| w[0] == w[1])))
        }
        "<" => compare_chain(name, args, |a, b| a < b),
        ">" => compare_chain(name, args, |a, b| a > b),
        "<=" => compare_chain(name, args, |a, b| a <= b),
        ">=" => compare_chain(name, args, |a, b| a >= b),
        "compare" => {
            arity(name, args, 2, 2)?;
            Ok(Value::Number(match compare_values(&args[0], &args[1]) {
                Ordering::Less => -1.0,
                Ordering::Equal => 0.0,
                Ordering::Greater => 1.0,
            }))
        }
        "not" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }
        "identity" => {
            arity(name, args, 1, 1)?;
            Ok(args[0].clone())
        }
        "type" => {
            arity(name, args, 1, 1)?;
            Ok(Value::from(args[0].type_name()))
        }

        // predicates
        "nil?" | "some?" | "string?" | "number?" | "map?" | "vector?" | "coll?" | "boolean?"
        | "true?" | "false?" => {
            arity(name, args, 1, 1)?;
            let v = &args[0];
            Ok(Value::Bool(match name {
                "nil?" => v.is_null(),
                "some?" => !v.is_null(),
                "string?" => matches!(v, Value::String(_)),
                "number?" => matches!(v, Value::Number(_)),
                "map?" => matches!(v, Value::Map(_)),
                "vector?" => matches!(v, Value::List(_)),
                "coll?" => matches!(v, Value::List(_) | Value::Map(_)),
                "boolean?" => matches!(v, Value::Bool(_)),
                "true?" => *v == Value::Bool(true),
                _ => *v == Value::Bool(false),
            }))
        }
        "zero?" | "pos?" | "neg?" | "even?" | "odd?" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(match name {
                "zero?" => num(name, &args[0])? == 0.0,
                "pos?" => num(name, &args[0])? > 0.0,
                "neg?" => num(name, &args[0])? < 0.0,
                "even?" => int(name, &args[0])? % 2 == 0,
                _ => int(name, &args[0])? % 2 != 0,
            }))
        }
        "empty?" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(seq_items(name, &args[0])?.is_empty()))
        }
        "contains?" => {
            arity(name, args, 2, 2)?;
            Ok(Value::Bool(match &args[0] {
                Value::Map(m) => m.contains_key(&key_string(&args[1])),
                Value::List(items) => args[1]
                    .as_i64()
                    .is_some_and(|i| i >= 0 && (i as usize) < items.len()),
                Value::String(s) => s.contains(&key_string(&args[1])),
                _ => false,
            }))
        }
        "blank?" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(match &args[0] {
                Value::Null => true,
                Value::String(s) => s.trim().is_empty(),
                _ => false,
            }))
        }

        // strings
        "str" => Ok(Value::String(
            args.iter()
                .map(|a| if a.is_null() { String::new() } else { a.to_string() })
                .collect(),
        )),
        "pr-str" => Ok(Value::String(
            args.iter()
                .map(Value::to_readable)
                .collect::<Vec<_>>()
                .join(" "),
        )),
        "subs" => {
            arity(name, args, 2, 3)?;
            let s = string(name, &args[0])?;
            let len = s.chars().count();
            let start = index(name, &args[1])?;
            let end = match args.get(2) {
                Some(e) => index(name, e)?,
                None => len,
            };
            if start > end || end > len {
                return Err(SandboxError::Runtime {
                    message: format!("String index out of range: {}..{} of {}", start, end, len),
                });
            }
            Ok(Value::String(char_slice(s, start, end)))
        }
        "upper-case" | "lower-case" | "trim" | "split-lines" | "parse-long" | "parse-double" => {
            arity(name, args, 1, 1)?;
            let s = string(name, &args[0])?;
            Ok(match name {
                "upper-case" => Value::String(s.to_uppercase()),
                "lower-case" => Value::String(s.to_lowercase()),
                "trim" => Value::String(s.trim().to_string()),
                "split-lines" => Value::from(s.lines().map(str::to_string).collect::<Vec<_>>()),
                "parse-long" => s
                    .trim()
                    .parse::<i64>()
                    .map(|n| Value::Number(n as f64))
                    .unwrap_or_default(),
                _ => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .unwrap_or_default(),
            })
        }
        "includes?" | "starts-with?" | "ends-with?" => {
            arity(name, args, 2, 2)?;
            let s = string(name, &args[0])?;
            let needle = string(name, &args[1])?;
            Ok(Value::Bool(match name {
                "includes?" => s.contains(needle),
                "starts-with?" => s.starts_with(needle),
                _ => s.ends_with(needle),
            }))
        }
        "split" => {
            arity(name, args, 2, 3)?;
            let s = string(name, &args[0])?;
            let pattern = string(name, &args[1])?;
            let limit = match args.get(2) {
                Some(l) => index(name, l)?,
                None => 0,
            };
            let parts: Vec<String> = match compile_regex(name, pattern) {
                Ok(re) if limit > 0 => re.splitn(s, limit).map(str::to_string).collect(),
                Ok(re) => re.split(s).map(str::to_string).collect(),
                Err(_) => s.split(pattern).map(str::to_string).collect(),
            };
            Ok(Value::from(parts))
        }
        "join" => {
            arity(name, args, 1, 2)?;
            let (sep, coll) = if args.len() == 1 {
                ("", &args[0])
            } else {
                (string(name, &args[0])?, &args[1])
            };
            let parts: Vec<String> = seq_items(name, coll)?
                .iter()
                .map(|v| if v.is_null() { String::new() } else { v.to_string() })
                .collect();
            Ok(Value::String(parts.join(sep)))
        }
        "replace" => {
            arity(name, args, 3, 3)?;
            let s = string(name, &args[0])?;
            let from = string(name, &args[1])?;
            let to = string(name, &args[2])?;
            if from.is_empty() {
                return Ok(Value::String(s.to_string()));
            }
            Ok(Value::String(s.replace(from, to)))
        }
        "re-find" | "re-seq" | "re-matches" => {
            arity(name, args, 2, 2)?;
            let pattern = string(name, &args[0])?;
            let s = string(name, &args[1])?;
            match name {
                "re-find" => {
                    let re = compile_regex(name, pattern)?;
                    Ok(re
                        .captures(s)
                        .map(|caps| match_value(&re, &caps))
                        .unwrap_or_default())
                }
                "re-seq" => {
                    let re = compile_regex(name, pattern)?;
                    Ok(Value::List(
                        re.captures_iter(s)
                            .map(|caps| match_value(&re, &caps))
                            .collect(),
                    ))
                }
                _ => {
                    let re = compile_regex(name, &format!("^(?:{})$", pattern))?;
                    Ok(re
                        .captures(s)
                        .map(|caps| match_value(&re, &caps))
                        .unwrap_or_default())
                }
            }
        }
        "name" | "keyword" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(key_string(&args[0])))
        }

        // collections
        "count" => {
            arity(name, args, 1, 1)?;
            Ok(Value::from(match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Map(m) => m.len(),
                other => seq_items(name, other)?.len(),
            }))
        }
        "first" | "second" | "last" => {
            arity(name, args, 1, 1)?;
            let items = seq_items(name, &args[0])?;
            Ok(match name {
                "first" => items.into_iter().next(),
                "second" => items.into_iter().nth(1),
                _ => items.into_iter().last(),
            }
            .unwrap_or_default())
        }
        "rest" | "next" | "butlast" => {
            arity(name, args, 1, 1)?;
            let mut items = seq_items(name, &args[0])?;
            match name {
                "butlast" => {
                    items.pop();
                }
                _ if !items.is_empty() => {
                    items.remove(0);
                }
                _ => {}
            }
            if name == "next" && items.is_empty() {
                return Ok(Value::Null);
            }
            Ok(Value::List(items))
        }
        "nth" => {
            arity(name, args, 2, 3)?;
            let items = seq_items(name, &args[0])?;
            let i = index(name, &args[1])?;
            match items.get(i) {
                Some(v) => Ok(v.clone()),
                None => match args.get(2) {
                    Some(default) => Ok(default.clone()),
                    None => Err(SandboxError::Runtime {
                        message: format!("Index {} out of bounds for length {}", i, items.len()),
                    }),
                },
            }
        }
        "get" => {
            arity(name, args, 2, 3)?;
            let found = get(&args[0], &args[1]);
            Ok(match (found, args.get(2)) {
                (Value::Null, Some(default)) => default.clone(),
                (found, _) => found,
            })
        }
        "get-in" => {
            arity(name, args, 2, 3)?;
            let mut current = args[0].clone();
            for key in seq_items(name, &args[1])? {
                current = get(&current, &key);
            }
            Ok(match (current, args.get(2)) {
                (Value::Null, Some(default)) => default.clone(),
                (found, _) => found,
            })
        }
        "assoc" => {
            arity(name, args, 3, usize::MAX)?;
            if args.len() % 2 == 0 {
                return Err(type_error(name, "expects key/value pairs"));
            }
            match &args[0] {
                Value::List(items) => {
                    let mut items = items.clone();
                    for pair in args[1..].chunks(2) {
                        let i = index(name, &pair[0])?;
                        if i < items.len() {
                            items[i] = pair[1].clone();
                        } else if i == items.len() {
                            items.push(pair[1].clone());
                        } else {
                            return Err(SandboxError::Runtime {
                                message: format!("Index {} out of bounds for assoc", i),
                            });
                        }
                    }
                    Ok(Value::List(items))
                }
                other => {
                    let mut m = map(name, other)?;
                    for pair in args[1..].chunks(2) {
                        m.insert(key_string(&pair[0]), pair[1].clone());
                    }
                    Ok(Value::Map(m))
                }
            }
        }
        "dissoc" => {
            arity(name, args, 1, usize::MAX)?;
            let mut m = map(name, &args[0])?;
            for key in &args[1..] {
                m.remove(&key_string(key));
            }
            Ok(Value::Map(m))
        }
        "keys" | "vals" => {
            arity(name, args, 1, 1)?;
            let m = map(name, &args[0])?;
            Ok(if name == "keys" {
                Value::List(m.into_keys().map(Value::String).collect())
            } else {
                Value::List(m.into_values().collect())
            })
        }
        "conj" => {
            arity(name, args, 1, usize::MAX)?;
            match &args[0] {
                Value::Map(m) => {
                    let mut m = m.clone();
                    pairs_into(name, &mut m, args[1..].to_vec())?;
                    Ok(Value::Map(m))
                }
                Value::List(_) | Value::Null => {
                    let mut items = seq_items(name, &args[0])?;
                    items.extend(args[1..].iter().cloned());
                    Ok(Value::List(items))
                }
                other => Err(type_error(name, format!("cannot conj onto {}", other.type_name()))),
            }
        }
        "cons" => {
            arity(name, args, 2, 2)?;
            let mut items = vec![args[0].clone()];
            items.extend(seq_items(name, &args[1])?);
            Ok(Value::List(items))
        }
        "concat" => {
            let mut items = Vec::new();
            for arg in args {
                items.extend(seq_items(name, arg)?);
            }
            Ok(Value::List(items))
        }
        "take" | "drop" | "take-last" => {
            arity(name, args, 2, 2)?;
            let n = int(name, &args[0])?.max(0) as usize;
            let items = seq_items(name, &args[1])?;
            let len = items.len();
            Ok(Value::List(match name {
                "take" => items.into_iter().take(n).collect(),
                "drop" => items.into_iter().skip(n).collect(),
                _ => items.into_iter().skip(len.saturating_sub(n)).collect(),
            }))
        }
        "reverse" | "sort" | "distinct" | "flatten" | "vec" | "seq" => {
            arity(name, args, 1, 1)?;
            let mut items = seq_items(name, &args[0])?;
            match name {
                "reverse" => items.reverse(),
                "sort" => items.sort_by(compare_values),
                "distinct" => {
                    let mut seen = BTreeSet::new();
                    items.retain(|v| seen.insert(v.to_readable()));
                }
                "flatten" => {
                    let mut out = Vec::new();
                    items.into_iter().for_each(|v| flatten_into(v, &mut out));
                    items = out;
                }
                "seq" if items.is_empty() => return Ok(Value::Null),
                _ => {}
            }
            Ok(Value::List(items))
        }
        "range" => {
            arity(name, args, 1, 3)?;
            let nums = args
                .iter()
                .map(|a| num(name, a))
                .collect::<Result<Vec<_>, _>>()?;
            let (start, end, step) = match nums.as_slice() {
                [end] => (0.0, *end, 1.0),
                [start, end] => (*start, *end, 1.0),
                [start, end, step] => (*start, *end, *step),
                _ => return Err(type_error(name, "expects 1 to 3 numbers")),
            };
            if step == 0.0 {
                return Err(type_error(name, "step must not be zero"));
            }
            let count = produced_len(name, args).unwrap_or(0);
            Ok(Value::List(
                (0..count)
                    .map(|i| Value::Number(start + step * i as f64))
                    .take_while(|v| match v {
                        Value::Number(n) if step > 0.0 => *n < end,
                        Value::Number(n) => *n > end,
                        _ => false,
                    })
                    .collect(),
            ))
        }
        "repeat" => {
            arity(name, args, 2, 2)?;
            let n = int(name, &args[0])?.max(0) as usize;
            Ok(Value::List(vec![args[1].clone(); n]))
        }
        "into" => {
            arity(name, args, 2, 2)?;
            let items = seq_items(name, &args[1])?;
            match &args[0] {
                Value::Map(m) => {
                    let mut m = m.clone();
                    pairs_into(name, &mut m, items)?;
                    Ok(Value::Map(m))
                }
                other => {
                    let mut target = seq_items(name, other)?;
                    target.extend(items);
                    Ok(Value::List(target))
                }
            }
        }
        "frequencies" => {
            arity(name, args, 1, 1)?;
            let mut counts: BTreeMap<String, Value> = BTreeMap::new();
            for item in seq_items(name, &args[0])? {
                let entry = counts.entry(key_string(&item)).or_insert(Value::Number(0.0));
                if let Value::Number(n) = entry {
                    *n += 1.0;
                }
            }
            Ok(Value::Map(counts))
        }
        "merge" => {
            let mut out = BTreeMap::new();
            for arg in args {
                out.extend(map(name, arg)?);
            }
            Ok(Value::Map(out))
        }
        "select-keys" => {
            arity(name, args, 2, 2)?;
            let m = map(name, &args[0])?;
            let mut out = BTreeMap::new();
            for key in seq_items(name, &args[1])? {
                let key = key_string(&key);
                if let Some(v) = m.get(&key) {
                    out.insert(key, v.clone());
                }
            }
            Ok(Value::Map(out))
        }
        "zipmap" => {
            arity(name, args, 2, 2)?;
            let keys = seq_items(name, &args[0])?;
            let vals = seq_items(name, &args[1])?;
            Ok(Value::Map(
                keys.iter()
                    .zip(vals)
                    .map(|(k, v)| (key_string(k), v))
                    .collect(),
            ))
        }
        "list" | "vector" => Ok(Value::List(args.to_vec())),
        "hash-map" => {
            if args.len() % 2 != 0 {
                return Err(type_error(name, "expects key/value pairs"));
            }
            Ok(Value::Map(
                args.chunks(2)
                    .map(|pair| (key_string(&pair[0]), pair[1].clone()))
                    .collect(),
            ))
        }
        "partition" | "partition-all" => {
            arity(name, args, 2, 2)?;
            let n = int(name, &args[0])?;
            if n <= 0 {
                return Err(type_error(name, "size must be positive"));
            }
            let items = seq_items(name, &args[1])?;
            Ok(Value::List(
                items
                    .chunks(n as usize)
                    .filter(|chunk| name == "partition-all" || chunk.len() == n as usize)
                    .map(|chunk| Value::List(chunk.to_vec()))
                    .collect(),
            ))
        }
        "interpose" => {
            arity(name, args, 2, 2)?;
            let items = seq_items(name, &args[1])?;
            let mut out = Vec::with_capacity(items.len() * 2);
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out.push(args[0].clone());
                }
                out.push(item);
            }
            Ok(Value::List(out))
        }

        _ => Err(SandboxError::UnboundSymbol {
            name: name.to_string(),
        }),
    }
}
