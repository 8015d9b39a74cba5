//! Structured coercion of model responses, the adapter behind `object()`.
//!
//! A grammar either produces a well-typed object/array or rejects the text.
//! There is no partial or best-effort parsing.

use std::fmt;

use indexmap::IndexMap;

use crate::runtime::dispatcher::ModelError;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::Value;

pub trait ResponseGrammar: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Parses a response; the error string describes why the text was rejected.
    fn parse(&self, text: &str) -> Result<Value, String>;
}

/// Strict JSON whose top level is an object or an array. Nested values are allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonGrammar;

impl ResponseGrammar for JsonGrammar {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        let json: serde_json::Value =
            serde_json::from_str(text.trim()).map_err(|e| format!("invalid JSON: {}", e))?;
        match json {
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => Ok(Value::from(json)),
            other => Err(format!(
                "expected a JSON object or array, found {}",
                json_kind(&other)
            )),
        }
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// One `key: value` pair per non-blank line. Values that parse as JSON
/// scalars keep their type; anything else is a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueGrammar;

impl ResponseGrammar for KeyValueGrammar {
    fn name(&self) -> &'static str {
        "key-value"
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        let mut entries = IndexMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, raw) = line
                .split_once(':')
                .ok_or_else(|| format!("line {} has no `key: value` separator", index + 1))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("line {} has an empty key", index + 1));
            }
            if entries.contains_key(key) {
                return Err(format!("key `{}` appears more than once", key));
            }
            entries.insert(key.to_string(), scalar(raw.trim()));
        }
        if entries.is_empty() {
            return Err("response contains no `key: value` lines".to_string());
        }
        Ok(Value::Object(entries))
    }
}

fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json @ (serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Number(_)
        | serde_json::Value::String(_))) => Value::from(json),
        _ => Value::String(raw.to_string()),
    }
}

pub fn grammar_by_name(name: &str) -> Option<Box<dyn ResponseGrammar>> {
    match name {
        "json" => Some(Box::new(JsonGrammar)),
        "key-value" | "key_value" | "kv" => Some(Box::new(KeyValueGrammar)),
        _ => None,
    }
}

/// Objects and arrays pass through; strings go through `grammar`.
pub fn coerce(grammar: &dyn ResponseGrammar, value: Value) -> RuntimeResult<Value> {
    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        Value::String(text) => grammar.parse(&text).map_err(|reason| {
            RuntimeError::Model(ModelError::parse_error(format!(
                "{} coercion failed: {}",
                grammar.name(),
                reason
            )))
        }),
        other => Err(RuntimeError::type_mismatch(
            "argument 1 of `object`",
            "string, object or array",
            &other,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dispatcher::PermanentReason;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_grammar_accepts_objects_and_arrays() {
        let value = JsonGrammar
            .parse(r#" {"criteria_met": false, "feedback": "shorter"} "#)
            .unwrap();
        assert_eq!(
            value,
            Value::object([
                ("criteria_met", Value::Boolean(false)),
                ("feedback", Value::string("shorter")),
            ])
        );
        assert_eq!(
            JsonGrammar.parse("[1, 2]").unwrap(),
            Value::Array(vec![Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn json_grammar_rejects_scalars_and_prose() {
        assert!(JsonGrammar.parse("42").is_err());
        assert!(JsonGrammar.parse("Sure! Here is the JSON: {}").is_err());
        assert!(JsonGrammar.parse(r#"{"a": 1"#).is_err());
    }

    #[test]
    fn key_value_grammar_types_scalars() {
        let value = KeyValueGrammar
            .parse("score: 7\napproved: true\nnote: needs work\n\n")
            .unwrap();
        assert_eq!(
            value,
            Value::object([
                ("score", Value::Integer(7)),
                ("approved", Value::Boolean(true)),
                ("note", Value::string("needs work")),
            ])
        );
        assert!(KeyValueGrammar.parse("just prose").is_err());
        assert!(KeyValueGrammar.parse("a: 1\na: 2").is_err());
    }

    #[test]
    fn coercion_failure_is_a_permanent_parse_error() {
        let err = coerce(&JsonGrammar, Value::string("not json at all")).unwrap_err();
        match err {
            RuntimeError::Model(ModelError::Permanent { reason, .. }) => {
                assert_eq!(reason, PermanentReason::ParseError)
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn coercion_passes_structures_and_rejects_other_kinds() {
        let obj = Value::object([("a", Value::Integer(1))]);
        assert_eq!(coerce(&JsonGrammar, obj.clone()).unwrap(), obj);
        assert!(matches!(
            coerce(&JsonGrammar, Value::Integer(3)),
            Err(RuntimeError::TypeMismatch { .. })
        ));
    }
}
