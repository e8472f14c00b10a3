//! Builtins that take functions as arguments.

use super::builtins::{check_arity, compare_values, get, key_string, seq_items};
use super::size::Footprint;
use super::{into_data, EvalResult, Interpreter, Object};
use delve_core::{SandboxError, Value};
use std::collections::BTreeMap;

fn split_fn(name: &str, args: Vec<Object>) -> Result<(Object, Vec<Object>), SandboxError> {
    let got = args.len();
    let mut iter = args.into_iter();
    let f = iter.next().ok_or_else(|| SandboxError::Arity {
        name: name.to_string(),
        expected: "2+".to_string(),
        got,
    })?;
    Ok((f, iter.collect()))
}

fn seq_of(name: &str, object: Object) -> Result<Vec<Value>, SandboxError> {
    seq_items(name, &into_data(object, name)?)
}

/// `>`-style comparators sort descending, `<`-style ascending.
fn comparator_order(object: &Object) -> Result<bool, SandboxError> {
    match object {
        Object::Builtin(">") | Object::Builtin(">=") => Ok(true),
        Object::Builtin("<") | Object::Builtin("<=") | Object::Builtin("compare") => Ok(false),
        _ => Err(SandboxError::Type {
            name: "sort-by".to_string(),
            message: "comparator must be one of <, <=, >, >=, compare".to_string(),
        }),
    }
}

impl<'a> Interpreter<'a> {
    fn apply_fn(&mut self, f: &Object, args: Vec<Value>) -> EvalResult<Value> {
        let result = self.call(f, args.into_iter().map(Object::Data).collect())?;
        Ok(into_data(result, "fn result")?)
    }

    pub(super) fn call_higher_order(&mut self, name: &str, args: Vec<Object>) -> EvalResult<Object> {
        let list = |items: Vec<Value>| -> EvalResult<Object> { Ok(Object::Data(Value::List(items))) };
        match name {
            "map" => {
                check_arity(name, args.len(), 2, usize::MAX)?;
                let (f, colls) = split_fn(name, args)?;
                let colls = colls
                    .into_iter()
                    .map(|c| seq_of(name, c))
                    .collect::<Result<Vec<_>, _>>()?;
                let len = colls.iter().map(Vec::len).min().unwrap_or(0);
                self.charge(len as u64)?;
                let mut out = Vec::with_capacity(len);
                let mut total = Footprint::default();
                for i in 0..len {
                    let call_args = colls.iter().map(|c| c[i].clone()).collect();
                    let result = self.apply_fn(&f, call_args)?;
                    self.accumulate(&mut total, &result)?;
                    out.push(result);
                }
                list(out)
            }
            "map-indexed" | "filter" | "remove" | "keep" | "mapcat" | "take-while"
            | "drop-while" => {
                check_arity(name, args.len(), 2, 2)?;
                let (f, mut rest) = split_fn(name, args)?;
                let items = seq_of(name, rest.remove(0))?;
                self.charge(items.len() as u64)?;
                let mut out = Vec::new();
                let mut total = Footprint::default();
                let mut dropping = true;
                for (i, item) in items.into_iter().enumerate() {
                    match name {
                        "map-indexed" => {
                            let result = self.apply_fn(&f, vec![Value::from(i), item])?;
                            self.accumulate(&mut total, &result)?;
                            out.push(result);
                        }
                        "filter" | "remove" => {
                            let keep = self.apply_fn(&f, vec![item.clone()])?.is_truthy();
                            if keep == (name == "filter") {
                                out.push(item);
                            }
                        }
                        "keep" => {
                            let result = self.apply_fn(&f, vec![item])?;
                            if !result.is_null() {
                                self.accumulate(&mut total, &result)?;
                                out.push(result);
                            }
                        }
                        "mapcat" => {
                            let result = self.apply_fn(&f, vec![item])?;
                            self.accumulate(&mut total, &result)?;
                            out.extend(seq_items(name, &result)?);
                        }
                        "take-while" => {
                            if !self.apply_fn(&f, vec![item.clone()])?.is_truthy() {
                                break;
                            }
                            out.push(item);
                        }
                        _ => {
                            if dropping && self.apply_fn(&f, vec![item.clone()])?.is_truthy() {
                                continue;
                            }
                            dropping = false;
                            out.push(item);
                        }
                    }
                }
                self.charge(out.len() as u64)?;
                list(out)
            }
            "reduce" => {
                check_arity(name, args.len(), 2, 3)?;
                let (f, mut rest) = split_fn(name, args)?;
                let coll = seq_of(name, rest.pop().unwrap_or_else(Object::nil))?;
                let mut items = coll.into_iter();
                let mut acc = match rest.pop() {
                    Some(init) => into_data(init, name)?,
                    None => match items.next() {
                        Some(first) => first,
                        None => return Ok(Object::Data(self.apply_fn(&f, Vec::new())?)),
                    },
                };
                for item in items {
                    acc = self.apply_fn(&f, vec![acc, item])?;
                }
                Ok(Object::Data(acc))
            }
            "sort-by" => {
                check_arity(name, args.len(), 2, 3)?;
                let (keyfn, mut rest) = split_fn(name, args)?;
                let coll = seq_of(name, rest.pop().unwrap_or_else(Object::nil))?;
                let descending = match rest.pop() {
                    Some(cmp) => comparator_order(&cmp)?,
                    None => false,
                };
                let mut keyed = Vec::with_capacity(coll.len());
                for item in coll {
                    keyed.push((self.apply_fn(&keyfn, vec![item.clone()])?, item));
                }
                keyed.sort_by(|(a, _), (b, _)| {
                    let ord = compare_values(a, b);
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
                list(keyed.into_iter().map(|(_, item)| item).collect())
            }
            "group-by" => {
                check_arity(name, args.len(), 2, 2)?;
                let (f, mut rest) = split_fn(name, args)?;
                let items = seq_of(name, rest.remove(0))?;
                let mut groups: BTreeMap<String, Value> = BTreeMap::new();
                for item in items {
                    let key = key_string(&self.apply_fn(&f, vec![item.clone()])?);
                    if let Value::List(members) =
                        groups.entry(key).or_insert_with(|| Value::List(Vec::new()))
                    {
                        members.push(item);
                    }
                }
                Ok(Object::Data(Value::Map(groups)))
            }
            "some" | "every?" => {
                check_arity(name, args.len(), 2, 2)?;
                let (f, mut rest) = split_fn(name, args)?;
                let items = seq_of(name, rest.remove(0))?;
                for item in items {
                    let result = self.apply_fn(&f, vec![item])?;
                    match (name, result.is_truthy()) {
                        ("some", true) => return Ok(Object::Data(result)),
                        ("every?", false) => return Ok(Object::Data(Value::Bool(false))),
                        _ => {}
                    }
                }
                Ok(Object::Data(if name == "some" {
                    Value::Null
                } else {
                    Value::Bool(true)
                }))
            }
            "apply" => {
                check_arity(name, args.len(), 2, usize::MAX)?;
                let (f, mut rest) = split_fn(name, args)?;
                let tail = seq_of(name, rest.pop().unwrap_or_else(Object::nil))?;
                rest.extend(tail.into_iter().map(Object::Data));
                self.call(&f, rest)
            }
            "update" => {
                check_arity(name, args.len(), 3, usize::MAX)?;
                let mut iter = args.into_iter();
                let target = into_data(iter.next().unwrap_or_else(Object::nil), name)?;
                let key = into_data(iter.next().unwrap_or_else(Object::nil), name)?;
                let f = iter.next().unwrap_or_else(Object::nil);
                let mut call_args = vec![get(&target, &key)];
                for extra in iter {
                    call_args.push(into_data(extra, name)?);
                }
                let updated = self.apply_fn(&f, call_args)?;
                Ok(Object::Data(super::builtins::call(
                    "assoc",
                    &[target, key, updated],
                )?))
            }
            _ => Err(SandboxError::UnboundSymbol {
                name: name.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparator_order() {
        assert!(comparator_order(&Object::Builtin(">")).unwrap());
        assert!(!comparator_order(&Object::Builtin("<")).unwrap());
        assert!(comparator_order(&Object::Data(Value::Null)).is_err());
    }
}
