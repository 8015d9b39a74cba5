// Built-in function library for flowscript

use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::ast::Symbol;
use crate::runtime::coercion::{coerce, ResponseGrammar};
use crate::runtime::environment::Environment;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::evaluator::Evaluator;
use crate::runtime::values::{
    Arity, BuiltinFunction, BuiltinFunctionWithEvaluator, Function, Value,
};

type PureFn = fn(Vec<Value>) -> RuntimeResult<Value>;
type HigherOrderFn = for<'a> fn(
    Vec<Value>,
    &'a Evaluator,
    &'a Arc<Environment>,
) -> BoxFuture<'a, RuntimeResult<Value>>;

/// The standard library: pure functions over arrays, objects and strings, plus
/// the `object` coercion bound to the configured response grammar.
pub struct StandardLibrary;

impl StandardLibrary {
    /// Creates the base environment every program environment descends from.
    pub fn create_global_environment(grammar: Arc<dyn ResponseGrammar>) -> Environment {
        let mut env = Environment::new();
        Self::load_sequence_functions(&mut env);
        Self::load_object_functions(&mut env);
        Self::load_predicates(&mut env);
        Self::load_higher_order_functions(&mut env);
        Self::load_coercion(&mut env, grammar);
        env
    }

    fn define(env: &mut Environment, name: &str, arity: Arity, func: PureFn) {
        env.define(
            &Symbol::new(name),
            Value::Function(Function::Builtin(BuiltinFunction {
                name: name.to_string(),
                arity,
                func: Arc::new(func),
            })),
        );
    }

    fn define_with_evaluator(env: &mut Environment, name: &str, arity: Arity, func: HigherOrderFn) {
        env.define(
            &Symbol::new(name),
            Value::Function(Function::BuiltinWithEvaluator(BuiltinFunctionWithEvaluator {
                name: name.to_string(),
                arity,
                func: Arc::new(func),
            })),
        );
    }

    fn load_sequence_functions(env: &mut Environment) {
        Self::define(env, "concat", Arity::Fixed(2), Self::concat);
        Self::define(env, "join", Arity::Fixed(2), Self::join);
        Self::define(env, "length", Arity::Fixed(1), Self::length);
        Self::define(env, "append", Arity::Fixed(2), Self::append);
        Self::define(env, "str", Arity::Fixed(1), Self::str);
        Self::define(env, "to-json", Arity::Fixed(1), Self::to_json);
    }

    fn load_object_functions(env: &mut Environment) {
        Self::define(env, "get", Arity::Range(2, 3), Self::get);
        Self::define(env, "keys", Arity::Fixed(1), Self::keys);
        Self::define(env, "merge", Arity::Fixed(2), Self::merge);
    }

    fn load_predicates(env: &mut Environment) {
        Self::define(env, "is-null?", Arity::Fixed(1), |args| {
            Ok(Value::Boolean(args.iter().all(Value::is_null)))
        });
        Self::define(env, "is-defined?", Arity::Fixed(1), |args| {
            Ok(Value::Boolean(!args.iter().any(Value::is_null)))
        });
        Self::define(env, "is-error?", Arity::Fixed(1), |args| {
            Ok(Value::Boolean(matches!(args.first(), Some(Value::Error(_)))))
        });
    }

    fn load_higher_order_functions(env: &mut Environment) {
        Self::define_with_evaluator(env, "map", Arity::Fixed(2), map);
        Self::define_with_evaluator(env, "filter", Arity::Fixed(2), filter);
        Self::define_with_evaluator(env, "every", Arity::Fixed(2), every);
    }

    /// `object(text)` coerces; `object()` returns the coercion as a function value.
    fn load_coercion(env: &mut Environment, grammar: Arc<dyn ResponseGrammar>) {
        let coercion = object_coercion(grammar);
        let with_default = coercion.clone();
        env.define(
            &Symbol::new("object"),
            Value::Function(Function::Builtin(BuiltinFunction {
                name: "object".to_string(),
                arity: Arity::Range(0, 1),
                func: Arc::new(move |args| match args.into_iter().next() {
                    None => Ok(Value::Function(Function::Builtin(with_default.clone()))),
                    Some(value) => (with_default.func)(vec![value]),
                }),
            })),
        );
    }

    // --- Sequences ---

    /// `concat(a, b)` - order-preserving concatenation, duplicates kept
    fn concat(args: Vec<Value>) -> RuntimeResult<Value> {
        let [first, second] = exactly::<2>("concat", args)?;
        let mut items = expect_array("concat", 1, first)?;
        items.extend(expect_array("concat", 2, second)?);
        Ok(Value::Array(items))
    }

    /// `join(strings, separator)`
    fn join(args: Vec<Value>) -> RuntimeResult<Value> {
        let [seq, separator] = exactly::<2>("join", args)?;
        let items = expect_array("join", 1, seq)?;
        let separator = match separator {
            Value::String(s) => s,
            other => return Err(argument_mismatch("join", 2, "string", &other)),
        };
        let mut parts = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match item {
                Value::String(s) => parts.push(s),
                other => {
                    return Err(RuntimeError::type_mismatch(
                        format!("element {} of argument 1 of `join`", index),
                        "string",
                        &other,
                    ))
                }
            }
        }
        Ok(Value::String(parts.join(&separator)))
    }

    fn length(args: Vec<Value>) -> RuntimeResult<Value> {
        let [value] = exactly::<1>("length", args)?;
        let len = match &value {
            Value::Array(items) => items.len(),
            Value::String(s) => s.chars().count(),
            Value::Object(map) => map.len(),
            other => return Err(argument_mismatch("length", 1, "array, string or object", other)),
        };
        Ok(Value::Integer(len as i64))
    }

    fn append(args: Vec<Value>) -> RuntimeResult<Value> {
        let [seq, value] = exactly::<2>("append", args)?;
        let mut items = expect_array("append", 1, seq)?;
        items.push(value);
        Ok(Value::Array(items))
    }

    fn str(args: Vec<Value>) -> RuntimeResult<Value> {
        let [value] = exactly::<1>("str", args)?;
        Ok(Value::String(value.render_text()))
    }

    fn to_json(args: Vec<Value>) -> RuntimeResult<Value> {
        let [value] = exactly::<1>("to-json", args)?;
        Ok(Value::String(value.to_json()?.to_string()))
    }

    // --- Objects ---

    /// `get(container, key, default?)` - missing keys give the default or null
    fn get(args: Vec<Value>) -> RuntimeResult<Value> {
        let mut args = args.into_iter();
        let container = args.next().unwrap_or(Value::Null);
        let key = args.next().unwrap_or(Value::Null);
        let default = args.next().unwrap_or(Value::Null);
        let found = match (container, key) {
            (Value::Object(mut map), Value::String(key)) => map.swap_remove(&key),
            (Value::Array(mut items), Value::Integer(i)) if i >= 0 && (i as usize) < items.len() => {
                Some(items.swap_remove(i as usize))
            }
            (Value::Array(_), Value::Integer(_)) => None,
            (Value::Object(_), other) | (Value::Array(_), other) => {
                return Err(argument_mismatch("get", 2, "string or integer key", &other))
            }
            (other, _) => return Err(argument_mismatch("get", 1, "object or array", &other)),
        };
        Ok(found.unwrap_or(default))
    }

    fn keys(args: Vec<Value>) -> RuntimeResult<Value> {
        let [value] = exactly::<1>("keys", args)?;
        let map = expect_object("keys", 1, value)?;
        Ok(Value::Array(map.into_keys().map(Value::String).collect()))
    }

    /// `merge(base, overrides)` - keys of `overrides` win, base order is kept
    fn merge(args: Vec<Value>) -> RuntimeResult<Value> {
        let [base, overrides] = exactly::<2>("merge", args)?;
        let mut merged = expect_object("merge", 1, base)?;
        for (key, value) in expect_object("merge", 2, overrides)? {
            merged.insert(key, value);
        }
        Ok(Value::Object(merged))
    }
}

fn object_coercion(grammar: Arc<dyn ResponseGrammar>) -> BuiltinFunction {
    BuiltinFunction {
        name: "object".to_string(),
        arity: Arity::Fixed(1),
        func: Arc::new(move |args| {
            let [value] = exactly::<1>("object", args)?;
            coerce(grammar.as_ref(), value)
        }),
    }
}

// --- Higher-order functions ---

/// `map(seq, f)` - order preserving
fn map<'a>(
    args: Vec<Value>,
    evaluator: &'a Evaluator,
    env: &'a Arc<Environment>,
) -> BoxFuture<'a, RuntimeResult<Value>> {
    Box::pin(async move {
        let [seq, f] = exactly::<2>("map", args)?;
        let items = expect_array("map", 1, seq)?;
        let f = expect_function("map", 2, f)?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(evaluator.call_function(f.clone(), vec![item], env).await?);
        }
        Ok(Value::Array(out))
    })
}

/// `filter(seq, predicate)` - the predicate must return a boolean
fn filter<'a>(
    args: Vec<Value>,
    evaluator: &'a Evaluator,
    env: &'a Arc<Environment>,
) -> BoxFuture<'a, RuntimeResult<Value>> {
    Box::pin(async move {
        let [seq, predicate] = exactly::<2>("filter", args)?;
        let items = expect_array("filter", 1, seq)?;
        let predicate = expect_function("filter", 2, predicate)?;
        let mut kept = Vec::new();
        for item in items {
            let verdict = evaluator
                .call_function(predicate.clone(), vec![item.clone()], env)
                .await?;
            if predicate_result("filter", verdict)? {
                kept.push(item);
            }
        }
        Ok(Value::Array(kept))
    })
}

/// `every(seq, predicate)` - stops at the first `false`
fn every<'a>(
    args: Vec<Value>,
    evaluator: &'a Evaluator,
    env: &'a Arc<Environment>,
) -> BoxFuture<'a, RuntimeResult<Value>> {
    Box::pin(async move {
        let [seq, predicate] = exactly::<2>("every", args)?;
        let items = expect_array("every", 1, seq)?;
        let predicate = expect_function("every", 2, predicate)?;
        for item in items {
            let verdict = evaluator
                .call_function(predicate.clone(), vec![item], env)
                .await?;
            if !predicate_result("every", verdict)? {
                return Ok(Value::Boolean(false));
            }
        }
        Ok(Value::Boolean(true))
    })
}

// --- Argument helpers ---

fn exactly<const N: usize>(name: &str, args: Vec<Value>) -> RuntimeResult<[Value; N]> {
    let count = args.len();
    args.try_into()
        .map_err(|_| RuntimeError::arity(name, N, count))
}

fn argument_mismatch(name: &str, position: usize, expected: &str, actual: &Value) -> RuntimeError {
    RuntimeError::type_mismatch(
        format!("argument {} of `{}`", position, name),
        expected,
        actual,
    )
}

fn expect_array(name: &str, position: usize, value: Value) -> RuntimeResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(argument_mismatch(name, position, "array", &other)),
    }
}

fn expect_object(
    name: &str,
    position: usize,
    value: Value,
) -> RuntimeResult<IndexMap<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(argument_mismatch(name, position, "object", &other)),
    }
}

fn expect_function(name: &str, position: usize, value: Value) -> RuntimeResult<Value> {
    match value {
        Value::Function(_) | Value::ModelHandle(_) => Ok(value),
        other => Err(argument_mismatch(name, position, "function", &other)),
    }
}

fn predicate_result(name: &str, verdict: Value) -> RuntimeResult<bool> {
    match verdict {
        Value::Boolean(b) => Ok(b),
        other => Err(RuntimeError::type_mismatch(
            format!("predicate result in `{}`", name),
            "boolean",
            &other,
        )),
    }
}

#[cfg(test)]
#[path = "stdlib_tests.rs"]
mod tests;
