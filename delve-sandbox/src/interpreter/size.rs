//! Value size accounting.
//!
//! Every value the interpreter keeps is measured once, when it is produced:
//! string bytes and collection elements at every level, plus nesting depth.
//! The walk is iterative and stops as soon as a limit is passed, so measuring
//! never costs more than the limits allow.

use delve_core::{SandboxError, SandboxLimits, Value};

/// Upper bound on the rendered width of one element (brackets, quotes,
/// separators and number digits).
const RENDER_CHARS_PER_ELEMENT: u64 = 32;

/// Measured size of a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footprint {
    pub chars: u64,
    pub elements: u64,
    pub depth: usize,
}

impl Footprint {
    /// Fuel billed for producing a value of this size.
    pub fn fuel(&self) -> u64 {
        self.elements + self.chars / 64
    }

    /// Characters the value may occupy once rendered with `str`.
    fn rendered_chars(&self) -> u64 {
        self.chars
            .saturating_add(self.elements.saturating_mul(RENDER_CHARS_PER_ELEMENT))
    }

    fn add(self, other: Footprint) -> Footprint {
        Footprint {
            chars: self.chars.saturating_add(other.chars),
            elements: self.elements.saturating_add(other.elements),
            depth: self.depth.max(other.depth),
        }
    }

    fn times(self, n: u64) -> Footprint {
        Footprint {
            chars: self.chars.saturating_mul(n),
            elements: self.elements.saturating_mul(n),
            depth: self.depth,
        }
    }

    fn exceeds(&self, limits: &SandboxLimits) -> bool {
        self.chars > limits.max_value_chars
            || self.elements > limits.max_value_elements
            || self.depth > limits.max_depth
    }

    pub fn check(&self, limits: &SandboxLimits) -> Result<(), SandboxError> {
        if self.depth > limits.max_depth {
            return Err(SandboxError::DepthExceeded {
                depth: limits.max_depth,
            });
        }
        if self.chars > limits.max_value_chars {
            return Err(SandboxError::ValueTooLarge {
                measure: "characters".to_string(),
                limit: limits.max_value_chars,
            });
        }
        if self.elements > limits.max_value_elements {
            return Err(SandboxError::ValueTooLarge {
                measure: "elements".to_string(),
                limit: limits.max_value_elements,
            });
        }
        Ok(())
    }
}

/// Measure `value`, giving up once it passes any limit. A footprint that
/// came back early still exceeds the limits, so `check` rejects it.
pub fn footprint(value: &Value, limits: &SandboxLimits) -> Footprint {
    let mut size = Footprint::default();
    let mut stack = vec![(value, 0usize)];
    while let Some((value, depth)) = stack.pop() {
        size.depth = size.depth.max(depth);
        match value {
            Value::String(s) => size.chars += s.len() as u64,
            Value::List(items) => {
                size.elements += items.len() as u64;
                stack.extend(items.iter().map(|item| (item, depth + 1)));
            }
            Value::Map(map) => {
                size.elements += map.len() as u64;
                for (key, item) in map {
                    size.chars += key.len() as u64;
                    stack.push((item, depth + 1));
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
        if size.exceeds(limits) {
            break;
        }
    }
    size
}

/// Reject a builtin call whose result would pass the limits, before the
/// result is built. Builtins not listed here never produce more than they
/// are given.
pub fn check_before_call(name: &str, args: &[Value], limits: &SandboxLimits) -> Result<(), SandboxError> {
    let total = |values: &[Value]| {
        values
            .iter()
            .map(|v| footprint(v, limits))
            .fold(Footprint::default(), Footprint::add)
    };
    let estimate = match name {
        "repeat" => {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0).max(0) as u64;
            let item = args.get(1).map(|v| footprint(v, limits)).unwrap_or_default();
            Footprint {
                elements: item.elements + 1,
                ..item
            }
            .times(n)
        }
        "str" | "pr-str" => {
            let all = total(args);
            Footprint {
                chars: all.rendered_chars(),
                elements: 0,
                depth: 0,
            }
        }
        "join" => {
            let (sep, coll) = match args {
                [sep, coll] => (footprint(sep, limits), footprint(coll, limits)),
                [coll] => (Footprint::default(), footprint(coll, limits)),
                _ => return Ok(()),
            };
            Footprint {
                chars: coll
                    .rendered_chars()
                    .saturating_add(sep.chars.saturating_mul(coll.elements)),
                elements: 0,
                depth: 0,
            }
        }
        "replace" => {
            let [s, _, to] = args else {
                return Ok(());
            };
            let s = footprint(s, limits).chars;
            let to = footprint(to, limits).chars;
            Footprint {
                chars: s.saturating_add(s.saturating_mul(to)),
                elements: 0,
                depth: 0,
            }
        }
        "interpose" => {
            let [sep, coll] = args else {
                return Ok(());
            };
            let coll = footprint(coll, limits);
            let sep = footprint(sep, limits);
            coll.add(Footprint {
                elements: sep.elements + 1,
                ..sep
            }
            .times(coll.elements))
        }
        "concat" | "into" | "conj" | "cons" | "merge" | "assoc" | "list" | "vector" | "hash-map"
        | "zipmap" => total(args),
        _ => return Ok(()),
    };
    estimate.check(&SandboxLimits {
        // depth is checked on the real result
        max_depth: usize::MAX,
        ..limits.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SandboxLimits {
        SandboxLimits {
            max_value_chars: 100,
            max_value_elements: 10,
            max_depth: 4,
            ..SandboxLimits::default()
        }
    }

    #[test]
    fn test_footprint_counts_nested_strings_and_keys() {
        let value = Value::map([(
            "title",
            Value::List(vec![Value::from("abc"), Value::from("de")]),
        )]);
        let size = footprint(&value, &limits());
        assert_eq!(size.chars, 10);
        assert_eq!(size.elements, 3);
        assert_eq!(size.depth, 2);
        assert!(size.check(&limits()).is_ok());
    }

    #[test]
    fn test_deep_value_rejected() {
        let mut value = Value::Number(1.0);
        for _ in 0..10 {
            value = Value::List(vec![value]);
        }
        assert_eq!(
            footprint(&value, &limits()).check(&limits()),
            Err(SandboxError::DepthExceeded { depth: 4 })
        );
    }

    #[test]
    fn test_repeat_estimate_rejects_before_building() {
        let args = [Value::from(1_000_000_000i64), Value::from("x")];
        assert!(matches!(
            check_before_call("repeat", &args, &limits()),
            Err(SandboxError::ValueTooLarge { .. })
        ));
        assert!(check_before_call("repeat", &[Value::from(3i64), Value::from("x")], &limits()).is_ok());
    }

    #[test]
    fn test_str_estimate_sums_arguments() {
        let half = Value::String("x".repeat(60));
        assert!(check_before_call("str", &[half.clone()], &limits()).is_ok());
        assert!(check_before_call("str", &[half.clone(), half], &limits()).is_err());
    }
}
