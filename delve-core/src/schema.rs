//! Output schema collaborator contract.
//!
//! A caller may attach an `OutputSpec` to a query. The finalized value is
//! checked against it by an `OutputParser`; intermediate iterations never are.

use crate::{SchemaError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Expected shape of a finalized answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputSpec {
    Any,
    String,
    Number,
    Bool,
    List { items: Box<OutputSpec> },
    Map { fields: BTreeMap<String, FieldSpec> },
    Enum { values: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub spec: OutputSpec,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn required(spec: OutputSpec) -> Self {
        Self {
            spec,
            required: true,
            description: None,
        }
    }

    pub fn optional(spec: OutputSpec) -> Self {
        Self {
            spec,
            required: false,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl OutputSpec {
    pub fn list_of(items: OutputSpec) -> Self {
        Self::List {
            items: Box::new(items),
        }
    }

    pub fn map_of<K: Into<String>>(fields: impl IntoIterator<Item = (K, FieldSpec)>) -> Self {
        Self::Map {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn one_of<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Compact description used in prompts, e.g. `[{:question string, :page number}]`.
    pub fn describe(&self) -> String {
        match self {
            Self::Any => "any".to_string(),
            Self::String => "string".to_string(),
            Self::Number => "number".to_string(),
            Self::Bool => "boolean".to_string(),
            Self::List { items } => format!("[{} ...]", items.describe()),
            Self::Map { fields } => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(name, field)| {
                        let mut part = format!(":{} {}", name, field.spec.describe());
                        if !field.required {
                            part.push_str(" (optional)");
                        }
                        if let Some(desc) = &field.description {
                            part.push_str(&format!(" ; {}", desc));
                        }
                        part
                    })
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Enum { values } => format!("one of {}", values.join(" | ")),
        }
    }
}

/// Turns a finalized value into a value that conforms to a spec.
pub trait OutputParser: Send + Sync {
    fn parse(&self, spec: &OutputSpec, value: &Value) -> Result<Value, SchemaError>;
}

/// Structural validator.
///
/// A string supplied where structured data is expected is parsed as JSON
/// first (code fences and surrounding prose are tolerated). Enum values
/// are matched case-insensitively and normalized to their declared form.
/// Map fields not named by the output spec are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralParser;

impl OutputParser for StructuralParser {
    fn parse(&self, spec: &OutputSpec, value: &Value) -> Result<Value, SchemaError> {
        check(spec, value, "$")
    }
}

fn mismatch(path: &str, expected: &str, found: &Value) -> SchemaError {
    SchemaError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

fn check(spec: &OutputSpec, value: &Value, path: &str) -> Result<Value, SchemaError> {
    // Structured data smuggled through a string.
    if let (OutputSpec::List { .. } | OutputSpec::Map { .. }, Value::String(text)) = (spec, value) {
        let json = extract_json(text).ok_or_else(|| SchemaError::InvalidJson {
            reason: format!("no JSON found at {}", path),
        })?;
        return check(spec, &Value::from(json), path);
    }

    match spec {
        OutputSpec::Any => Ok(value.clone()),
        OutputSpec::String => match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(mismatch(path, "string", other)),
        },
        OutputSpec::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| mismatch(path, "number", value)),
            other => Err(mismatch(path, "number", other)),
        },
        OutputSpec::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            other => Err(mismatch(path, "boolean", other)),
        },
        OutputSpec::Enum { values } => {
            let s = value
                .as_str()
                .ok_or_else(|| mismatch(path, "string", value))?;
            values
                .iter()
                .find(|allowed| allowed.eq_ignore_ascii_case(s.trim()))
                .map(|allowed| Value::String(allowed.clone()))
                .ok_or_else(|| SchemaError::NotAllowed {
                    path: path.to_string(),
                    allowed: values.clone(),
                })
        }
        OutputSpec::List { items } => {
            let list = value.as_list().ok_or_else(|| mismatch(path, "list", value))?;
            list.iter()
                .enumerate()
                .map(|(i, item)| check(items, item, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        OutputSpec::Map { fields } => {
            let map = value.as_map().ok_or_else(|| mismatch(path, "map", value))?;
            let mut out = BTreeMap::new();
            for (name, field) in fields {
                let field_path = format!("{}.{}", path, name);
                match map.get(name) {
                    Some(Value::Null) | None if field.required => {
                        return Err(SchemaError::MissingField { path: field_path })
                    }
                    Some(Value::Null) | None => {}
                    Some(v) => {
                        out.insert(name.clone(), check(&field.spec, v, &field_path)?);
                    }
                }
            }
            Ok(Value::Map(out))
        }
    }
}

/// Find a JSON document in free-form model text.
///
/// Tries the whole text, then the first fenced block, then the widest
/// `[...]` or `{...}` span.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            if let Ok(v) = serde_json::from_str(body[..end].trim()) {
                return Some(v);
            }
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(v);
                }
            }
        }
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parties_spec() -> OutputSpec {
        OutputSpec::list_of(OutputSpec::String)
    }

    #[test]
    fn test_list_of_strings_passes() {
        let value = Value::from(json!(["Acme Corp", "Beta LLC"]));
        let parsed = StructuralParser.parse(&parties_spec(), &value).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_json_string_is_parsed() {
        let value = Value::from("Here you go:\n```json\n[\"Acme Corp\"]\n```");
        let parsed = StructuralParser.parse(&parties_spec(), &value).unwrap();
        assert_eq!(parsed, Value::from(json!(["Acme Corp"])));
    }

    #[test]
    fn test_type_mismatch_reports_path() {
        let value = Value::from(json!(["Acme Corp", 3]));
        match StructuralParser.parse(&parties_spec(), &value) {
            Err(SchemaError::TypeMismatch { path, expected, found }) => {
                assert_eq!(path, "$[1]");
                assert_eq!(expected, "string");
                assert_eq!(found, "number");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_map_required_and_optional_fields() {
        let spec = OutputSpec::map_of([
            ("name", FieldSpec::required(OutputSpec::String)),
            ("page", FieldSpec::optional(OutputSpec::Number)),
        ]);
        let ok = Value::from(json!({"name": "Acme", "extra": true}));
        let parsed = StructuralParser.parse(&spec, &ok).unwrap();
        assert_eq!(parsed, Value::from(json!({"name": "Acme"})));

        let missing = Value::from(json!({"page": 2}));
        assert_eq!(
            StructuralParser.parse(&spec, &missing),
            Err(SchemaError::MissingField {
                path: "$.name".to_string()
            })
        );
    }

    #[test]
    fn test_enum_normalizes_case() {
        let spec = OutputSpec::one_of(["pass", "fail", "needs-revision"]);
        let parsed = StructuralParser.parse(&spec, &Value::from("PASS")).unwrap();
        assert_eq!(parsed, Value::from("pass"));
        assert!(matches!(
            StructuralParser.parse(&spec, &Value::from("maybe")),
            Err(SchemaError::NotAllowed { .. })
        ));
    }

    #[test]
    fn test_number_from_numeric_string() {
        let parsed = StructuralParser
            .parse(&OutputSpec::Number, &Value::from(" 42 "))
            .unwrap();
        assert_eq!(parsed, Value::Number(42.0));
    }

    #[test]
    fn test_unparseable_string_for_list() {
        assert!(matches!(
            StructuralParser.parse(&parties_spec(), &Value::from("no idea")),
            Err(SchemaError::InvalidJson { .. })
        ));
    }

    #[test]
    fn test_describe() {
        let spec = OutputSpec::list_of(OutputSpec::map_of([
            ("page", FieldSpec::required(OutputSpec::Number)),
            ("question", FieldSpec::optional(OutputSpec::String)),
        ]));
        assert_eq!(
            spec.describe(),
            "[{:page number, :question string (optional)} ...]"
        );
    }

    #[test]
    fn test_extract_json_from_prose() {
        let v = extract_json("The claims are [\"a\", \"b\"] as requested.").unwrap();
        assert_eq!(v, json!(["a", "b"]));
        assert!(extract_json("nothing here").is_none());
    }
}
