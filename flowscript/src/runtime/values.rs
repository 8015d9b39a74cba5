// Runtime value system for flowscript
// Represents values during execution (different from AST which represents parsed code)

use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::ast::FnDef;
use crate::runtime::dispatcher::ModelError;
use crate::runtime::environment::Environment;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::evaluator::Evaluator;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Function(Function),
    ModelHandle(Arc<ModelTemplate>),
    Error(ErrorValue),
}

/// Failure half of a model invocation result, produced by `try(...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub kind: String,
    pub message: String,
}

impl From<&ModelError> for ErrorValue {
    fn from(err: &ModelError) -> Self {
        ErrorValue {
            kind: err.kind_name().to_string(),
            message: err.to_string(),
        }
    }
}

/// Prompt template plus evaluated options, the payload of a model handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTemplate {
    pub template: String,
    pub options: IndexMap<String, Value>,
}

impl ModelTemplate {
    pub fn new(template: &str) -> Self {
        ModelTemplate {
            template: template.to_string(),
            options: IndexMap::new(),
        }
    }
}

// --- Functions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Fixed(n) => count == n,
            Arity::Range(min, max) => count >= min && count <= max,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Range(min, max) => write!(f, "{} to {}", min, max),
        }
    }
}

pub type BuiltinFn = Arc<dyn Fn(Vec<Value>) -> RuntimeResult<Value> + Send + Sync>;

/// Builtins that call back into the evaluator (higher-order functions).
pub type BuiltinEvalFn = Arc<
    dyn for<'a> Fn(
            Vec<Value>,
            &'a Evaluator,
            &'a Arc<Environment>,
        ) -> BoxFuture<'a, RuntimeResult<Value>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: String,
    pub arity: Arity,
    pub func: BuiltinFn,
}

#[derive(Clone)]
pub struct BuiltinFunctionWithEvaluator {
    pub name: String,
    pub arity: Arity,
    pub func: BuiltinEvalFn,
}

/// Environment a closure closes over. Top-level functions hold the program
/// root weakly so the root can contain them without a reference cycle.
#[derive(Clone)]
pub enum CapturedEnv {
    Strong(Arc<Environment>),
    Global(Weak<Environment>),
}

impl CapturedEnv {
    pub fn resolve(&self) -> RuntimeResult<Arc<Environment>> {
        match self {
            CapturedEnv::Strong(env) => Ok(env.clone()),
            CapturedEnv::Global(weak) => weak.upgrade().ok_or_else(|| {
                RuntimeError::Internal("program environment was dropped".to_string())
            }),
        }
    }
}

pub struct Closure {
    pub def: Arc<FnDef>,
    pub env: CapturedEnv,
}

impl Closure {
    pub fn new(def: Arc<FnDef>, env: Arc<Environment>) -> Self {
        Closure {
            def,
            env: CapturedEnv::Strong(env),
        }
    }
}

#[derive(Clone)]
pub enum Function {
    Builtin(BuiltinFunction),
    BuiltinWithEvaluator(BuiltinFunctionWithEvaluator),
    Closure(Arc<Closure>),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Builtin(b) => &b.name,
            Function::BuiltinWithEvaluator(b) => &b.name,
            Function::Closure(c) => c.def.display_name(),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Builtin(b) => write!(f, "#<builtin {}>", b.name),
            Function::BuiltinWithEvaluator(b) => write!(f, "#<builtin {}>", b.name),
            Function::Closure(c) => write!(f, "#<fun {}/{}>", c.def.display_name(), c.def.params.len()),
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Function::Builtin(a), Function::Builtin(b)) => a.name == b.name,
            (Function::BuiltinWithEvaluator(a), Function::BuiltinWithEvaluator(b)) => {
                a.name == b.name
            }
            (Function::Closure(a), Function::Closure(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// --- Value behaviour ---

/// Structural equality; integers and floats compare numerically.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::ModelHandle(a), Value::ModelHandle(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{:?}", fl),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Object(map) => {
                let entries: Vec<String> =
                    map.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Value::Function(func) => write!(f, "{:?}", func),
            Value::ModelHandle(h) => write!(f, "#<model {:?}>", h.template),
            Value::Error(e) => write!(f, "#<error {}: {}>", e.kind, e.message),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::ModelHandle(_) => "model",
            Value::Error(_) => "error",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn object<I, K>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    /// Text used when a value is spliced into a prompt: strings verbatim,
    /// everything else as compact JSON (or its display form if not serializable).
    pub fn render_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other
                .to_json()
                .map(|json| json.to_string())
                .unwrap_or_else(|_| other.to_string()),
        }
    }

    pub fn to_json(&self) -> RuntimeResult<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(fl) => serde_json::Number::from_f64(*fl)
                .map(serde_json::Value::Number)
                .ok_or_else(|| RuntimeError::type_mismatch("JSON conversion", "finite number", self))?,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<RuntimeResult<Vec<_>>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(out)
            }
            Value::Error(e) => serde_json::json!({ "error": e.kind, "message": e.message }),
            Value::Function(_) | Value::ModelHandle(_) => {
                return Err(RuntimeError::type_mismatch(
                    "JSON conversion",
                    "data value",
                    self,
                ))
            }
        })
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(Value::Integer(1), Value::Float(1.0));
        assert_ne!(Value::Integer(1), Value::String("1".into()));
    }

    #[test]
    fn json_conversion_keeps_key_order() {
        let value = Value::from(json!({"z": 1, "a": [true, null, 2.5], "m": {"k": "v"}}));
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(
            value.to_json().unwrap(),
            json!({"z": 1, "a": [true, null, 2.5], "m": {"k": "v"}})
        );
    }

    #[test]
    fn render_text_leaves_strings_bare() {
        assert_eq!(Value::string("plain").render_text(), "plain");
        assert_eq!(
            Value::object([("a", Value::Integer(1))]).render_text(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn display_is_source_like() {
        let value = Value::object([
            ("status", Value::string("success")),
            ("iterations", Value::Integer(3)),
        ]);
        assert_eq!(value.to_string(), r#"{status: "success", iterations: 3}"#);
    }

    #[test]
    fn arity_ranges() {
        assert!(Arity::Range(2, 3).accepts(3));
        assert!(!Arity::Fixed(1).accepts(2));
        assert_eq!(Arity::Range(0, 1).to_string(), "0 to 1");
    }
}
