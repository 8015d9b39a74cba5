// Async tree-walking evaluator for flowscript

use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use itertools::Itertools;
use tracing::debug;

use crate::ast::{
    BinaryOp, Expression, Guard, LetBinding, LetExpr, Literal, LoopExpr, MatchExpr, ModelExpr,
};
use crate::runtime::dispatcher::EffectDispatcher;
use crate::runtime::environment::Environment;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::operators::{apply_binary, apply_unary, expect_bool};
use crate::runtime::values::{Arity, Closure, ErrorValue, Function, ModelTemplate, Value};
use crate::stack::guarded;

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    /// Maximum number of nested closure calls before `StackOverflow`.
    pub max_call_depth: usize,
    /// Evaluate independent `let` bindings and object entries concurrently.
    pub parallel_bindings: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            max_call_depth: 512,
            parallel_bindings: true,
        }
    }
}

/// Control value of the loop trampoline: a body either asks for another
/// iteration with a new state or finishes with a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Trampoline {
    Continue(Value),
    Return(Value),
}

impl Trampoline {
    /// A `Continue` that reaches a non-loop context is a misplaced `recur`.
    pub fn into_value(self) -> RuntimeResult<Value> {
        match self {
            Trampoline::Return(value) => Ok(value),
            Trampoline::Continue(_) => Err(RuntimeError::RecurOutsideLoop),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    dispatcher: Arc<EffectDispatcher>,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(dispatcher: Arc<EffectDispatcher>) -> Self {
        Evaluator {
            dispatcher,
            config: EvaluatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<EffectDispatcher> {
        &self.dispatcher
    }

    /// Evaluates `expr` in `env` outside of any loop body.
    pub fn eval_expr<'a>(
        &'a self,
        expr: &'a Expression,
        env: &'a Arc<Environment>,
    ) -> BoxFuture<'a, RuntimeResult<Value>> {
        guarded(async move {
            match expr {
                Expression::Literal(lit) => Ok(eval_literal(lit)),
                Expression::Identifier(sym) => env.lookup(sym),
                Expression::Object(entries) => self.eval_object(entries, env).await,
                Expression::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(item, env).await?);
                    }
                    Ok(Value::Array(values))
                }
                Expression::Lambda(def) => Ok(Value::Function(Function::Closure(Arc::new(
                    Closure::new(def.clone(), env.clone()),
                )))),
                Expression::Call { callee, arguments } => {
                    let func = self.eval_expr(callee, env).await?;
                    let mut args = Vec::with_capacity(arguments.len());
                    for arg in arguments {
                        args.push(self.eval_expr(arg, env).await?);
                    }
                    self.call_function(func, args, env).await
                }
                Expression::Field { target, field } => {
                    let value = self.eval_expr(target, env).await?;
                    field_of(value, field)
                }
                Expression::Index { target, index } => {
                    let value = self.eval_expr(target, env).await?;
                    let index = self.eval_expr(index, env).await?;
                    index_of(value, index)
                }
                Expression::Unary { op, operand } => {
                    let value = self.eval_expr(operand, env).await?;
                    apply_unary(*op, value)
                }
                Expression::Binary { op, left, right } => {
                    self.eval_binary(*op, left, right, env).await
                }
                Expression::Let(let_expr) => self.eval_let(let_expr, env, false).await?.into_value(),
                Expression::Match(match_expr) => {
                    self.eval_match(match_expr, env, false).await?.into_value()
                }
                Expression::Loop(loop_expr) => self.eval_loop(loop_expr, env).await,
                Expression::Recur(_) => Err(RuntimeError::RecurOutsideLoop),
                Expression::Model(model) => self.eval_model(model, env).await,
                Expression::Try(inner) => match self.eval_expr(inner, env).await {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        let caught = err.model_error().map(ErrorValue::from);
                        match caught {
                            Some(error_value) => {
                                debug!(kind = %error_value.kind, "try caught model failure");
                                Ok(Value::Error(error_value))
                            }
                            None => Err(err),
                        }
                    }
                },
                Expression::Defined(inner) => {
                    let probed = self.probe(inner, env).await?;
                    Ok(Value::Boolean(matches!(probed, Some(v) if !v.is_null())))
                }
            }
        })
    }

    /// Evaluates `expr` in tail position. With `tail` set, a `recur` reached
    /// through `let` bodies and `match` clauses becomes `Trampoline::Continue`.
    pub fn eval_tail<'a>(
        &'a self,
        expr: &'a Expression,
        env: &'a Arc<Environment>,
        tail: bool,
    ) -> BoxFuture<'a, RuntimeResult<Trampoline>> {
        guarded(async move {
            match expr {
                Expression::Recur(recur) if tail => {
                    let next = self.eval_expr(&recur.value, env).await?;
                    Ok(Trampoline::Continue(next))
                }
                Expression::Let(let_expr) => self.eval_let(let_expr, env, tail).await,
                Expression::Match(match_expr) => self.eval_match(match_expr, env, tail).await,
                other => self.eval_expr(other, env).await.map(Trampoline::Return),
            }
        })
    }

    // --- Calls ---

    pub fn call_function<'a>(
        &'a self,
        func: Value,
        args: Vec<Value>,
        env: &'a Arc<Environment>,
    ) -> BoxFuture<'a, RuntimeResult<Value>> {
        guarded(async move {
            match func {
                Value::Function(Function::Builtin(builtin)) => {
                    check_arity(&builtin.name, &builtin.arity, args.len())?;
                    (builtin.func)(args)
                }
                Value::Function(Function::BuiltinWithEvaluator(builtin)) => {
                    check_arity(&builtin.name, &builtin.arity, args.len())?;
                    (builtin.func)(args, self, env).await
                }
                Value::Function(Function::Closure(closure)) => {
                    self.call_closure(closure, args, env, false).await?.into_value()
                }
                Value::ModelHandle(handle) => {
                    let mut args = args;
                    if args.len() != 1 {
                        return Err(RuntimeError::arity("model", 1, args.len()));
                    }
                    let input = args.pop().unwrap_or(Value::Null);
                    Ok(self.dispatcher.invoke(&handle, input).await?)
                }
                other => Err(RuntimeError::type_mismatch("call target", "function", &other)),
            }
        })
    }

    /// Binds arguments in a fresh frame on top of the captured scope. Defaults
    /// of omitted trailing parameters are evaluated in the captured scope.
    pub fn call_closure<'a>(
        &'a self,
        closure: Arc<Closure>,
        args: Vec<Value>,
        caller: &'a Arc<Environment>,
        tail: bool,
    ) -> BoxFuture<'a, RuntimeResult<Trampoline>> {
        guarded(async move {
            let def = &closure.def;
            let depth = caller.depth() + 1;
            if depth > self.config.max_call_depth {
                return Err(RuntimeError::StackOverflow {
                    depth: self.config.max_call_depth,
                });
            }
            if !def.accepts(args.len()) {
                let arity = if def.required_params() == def.params.len() {
                    Arity::Fixed(def.params.len())
                } else {
                    Arity::Range(def.required_params(), def.params.len())
                };
                return Err(RuntimeError::arity(def.display_name(), arity, args.len()));
            }

            let captured = closure.env.resolve()?;
            let mut frame = Environment::frame(captured.clone(), depth);
            let mut supplied = args.into_iter();
            for param in &def.params {
                let value = match (supplied.next(), &param.default) {
                    (Some(value), _) => value,
                    (None, Some(default)) => self.eval_expr(default, &captured).await?,
                    (None, None) => {
                        return Err(RuntimeError::Internal(format!(
                            "no value for parameter `{}`",
                            param.name
                        )))
                    }
                };
                frame.define(&param.name, value);
            }
            let frame = Arc::new(frame);
            self.eval_tail(&def.body, &frame, tail).await
        })
    }

    // --- let ---

    async fn eval_let(
        &self,
        let_expr: &LetExpr,
        env: &Arc<Environment>,
        tail: bool,
    ) -> RuntimeResult<Trampoline> {
        let scope = if self.config.parallel_bindings && let_expr.bindings.len() > 1 {
            self.bind_concurrently(&let_expr.bindings, env).await?
        } else {
            self.bind_sequentially(&let_expr.bindings, env).await?
        };
        self.eval_tail(&let_expr.body, &scope, tail).await
    }

    async fn bind_sequentially(
        &self,
        bindings: &[LetBinding],
        env: &Arc<Environment>,
    ) -> RuntimeResult<Arc<Environment>> {
        let mut scope = env.clone();
        for binding in bindings {
            let value = self.eval_expr(&binding.value, &scope).await?;
            scope = Environment::child(scope, &binding.name, value);
        }
        Ok(scope)
    }

    /// Each binding waits only for the earlier bindings it mentions and sees
    /// them stacked in declaration order, so the bound values equal those of
    /// sequential evaluation. The first failure drops every pending sibling.
    async fn bind_concurrently(
        &self,
        bindings: &[LetBinding],
        env: &Arc<Environment>,
    ) -> RuntimeResult<Arc<Environment>> {
        let dependencies = binding_dependencies(bindings);
        debug!(
            bindings = bindings.len(),
            independent = dependencies.iter().filter(|d| d.is_empty()).count(),
            "fanning out let bindings"
        );

        let mut tasks: Vec<Shared<BoxFuture<'_, RuntimeResult<Value>>>> =
            Vec::with_capacity(bindings.len());
        for (index, binding) in bindings.iter().enumerate() {
            let upstream: Vec<_> = dependencies[index]
                .iter()
                .map(|&dep| (&bindings[dep].name, tasks[dep].clone()))
                .collect();
            let task = async move {
                let mut scope = env.clone();
                for (name, task) in upstream {
                    let value = task.await?;
                    scope = Environment::child(scope, name, value);
                }
                self.eval_expr(&binding.value, &scope).await
            }
            .boxed()
            .shared();
            tasks.push(task);
        }

        let values = try_join_all(tasks).await?;
        let mut scope = env.clone();
        for (binding, value) in bindings.iter().zip(values) {
            scope = Environment::child(scope, &binding.name, value);
        }
        Ok(scope)
    }

    async fn eval_object(
        &self,
        entries: &[(String, Expression)],
        env: &Arc<Environment>,
    ) -> RuntimeResult<Value> {
        let values = if self.config.parallel_bindings && entries.len() > 1 {
            try_join_all(entries.iter().map(|(_, expr)| self.eval_expr(expr, env))).await?
        } else {
            let mut values = Vec::with_capacity(entries.len());
            for (_, expr) in entries {
                values.push(self.eval_expr(expr, env).await?);
            }
            values
        };
        let map: IndexMap<String, Value> = entries
            .iter()
            .map(|(key, _)| key.clone())
            .zip(values)
            .collect();
        Ok(Value::Object(map))
    }

    // --- match ---

    async fn eval_match(
        &self,
        match_expr: &MatchExpr,
        env: &Arc<Environment>,
        tail: bool,
    ) -> RuntimeResult<Trampoline> {
        let scrutinee = match &match_expr.scrutinee {
            Some(expr) => Some(self.eval_expr(expr, env).await?),
            None => None,
        };
        let scope = match (&match_expr.binder, &scrutinee) {
            (Some(name), Some(value)) => Environment::child(env.clone(), name, value.clone()),
            _ => env.clone(),
        };

        for clause in &match_expr.clauses {
            let selected = match &clause.guard {
                Guard::Wildcard => true,
                Guard::Expr(guard) => {
                    let outcome = self.eval_expr(guard, &scope).await?;
                    expect_bool("match guard", outcome)?
                }
            };
            if selected {
                return self.eval_tail(&clause.body, &scope, tail).await;
            }
        }

        Err(RuntimeError::NoMatch {
            scrutinee: scrutinee
                .map(|v| v.to_string())
                .unwrap_or_else(|| "<no scrutinee>".to_string()),
        })
    }

    // --- loop ---

    /// Runs the loop body as a trampoline: one native call per iteration,
    /// no stack growth across iterations.
    async fn eval_loop(&self, loop_expr: &LoopExpr, env: &Arc<Environment>) -> RuntimeResult<Value> {
        let mut state = self.eval_expr(&loop_expr.initial, env).await?;
        let body = self.eval_expr(&loop_expr.body, env).await?;
        let mut iteration: u64 = 0;
        loop {
            iteration += 1;
            debug!(iteration, "loop iteration");
            let step = match &body {
                Value::Function(Function::Closure(closure)) => {
                    self.call_closure(closure.clone(), vec![state.clone()], env, true)
                        .await
                }
                other => self
                    .call_function(other.clone(), vec![state.clone()], env)
                    .await
                    .map(Trampoline::Return),
            };
            match step {
                Ok(Trampoline::Continue(next)) => state = next,
                Ok(Trampoline::Return(value)) => {
                    debug!(iterations = iteration, "loop finished");
                    return Ok(value);
                }
                Err(source) => {
                    return Err(RuntimeError::LoopAborted {
                        iteration,
                        last_state: state,
                        source: Box::new(source),
                    })
                }
            }
        }
    }

    // --- Operators, models, probes ---

    async fn eval_binary(
        &self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        env: &Arc<Environment>,
    ) -> RuntimeResult<Value> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let operand = format!("operand of `{}`", op.symbol());
                let lhs = expect_bool(&operand, self.eval_expr(left, env).await?)?;
                if (op == BinaryOp::And && !lhs) || (op == BinaryOp::Or && lhs) {
                    return Ok(Value::Boolean(lhs));
                }
                let rhs = expect_bool(&operand, self.eval_expr(right, env).await?)?;
                Ok(Value::Boolean(rhs))
            }
            _ => {
                let lhs = self.eval_expr(left, env).await?;
                let rhs = self.eval_expr(right, env).await?;
                apply_binary(op, lhs, rhs)
            }
        }
    }

    async fn eval_model(&self, model: &ModelExpr, env: &Arc<Environment>) -> RuntimeResult<Value> {
        let options = match &model.options {
            None => IndexMap::new(),
            Some(expr) => match self.eval_expr(expr, env).await? {
                Value::Object(map) => map,
                other => return Err(RuntimeError::type_mismatch("model options", "object", &other)),
            },
        };
        Ok(Value::ModelHandle(Arc::new(ModelTemplate {
            template: model.template.clone(),
            options,
        })))
    }

    /// Like `eval_expr`, but unbound names, missing fields and out-of-range
    /// indices along an access path yield `None` instead of an error.
    fn probe<'a>(
        &'a self,
        expr: &'a Expression,
        env: &'a Arc<Environment>,
    ) -> BoxFuture<'a, RuntimeResult<Option<Value>>> {
        guarded(async move {
            match expr {
                Expression::Identifier(sym) => Ok(env.find(sym.as_str()).cloned()),
                Expression::Field { target, field } => Ok(match self.probe(target, env).await? {
                    Some(Value::Object(map)) => map.get(field).cloned(),
                    _ => None,
                }),
                Expression::Index { target, index } => {
                    let target = self.probe(target, env).await?;
                    let index = self.eval_expr(index, env).await?;
                    Ok(target.and_then(|t| index_of(t, index).ok()))
                }
                other => self.eval_expr(other, env).await.map(Some),
            }
        })
    }
}

fn eval_literal(lit: &Literal) -> Value {
    match lit {
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Null => Value::Null,
    }
}

fn check_arity(name: &str, arity: &Arity, actual: usize) -> RuntimeResult<()> {
    if arity.accepts(actual) {
        Ok(())
    } else {
        Err(RuntimeError::arity(name, arity, actual))
    }
}

/// For each binding, the indices of earlier bindings it may read. Any mention
/// of an earlier binding's name counts, even if it is shadowed internally.
pub fn binding_dependencies(bindings: &[LetBinding]) -> Vec<Vec<usize>> {
    bindings
        .iter()
        .enumerate()
        .map(|(index, binding)| {
            let mentioned = binding.value.identifiers();
            (0..index)
                .filter(|&earlier| mentioned.contains(bindings[earlier].name.as_str()))
                .collect()
        })
        .collect()
}

pub fn field_of(value: Value, field: &str) -> RuntimeResult<Value> {
    match value {
        Value::Object(mut map) => match map.swap_remove(field) {
            Some(found) => Ok(found),
            None => Err(RuntimeError::TypeMismatch {
                operand: format!("field access `.{}`", field),
                expected: format!("object with field `{}`", field),
                actual: format!("object with fields [{}]", map.keys().join(", ")),
            }),
        },
        Value::Error(err) if field == "kind" => Ok(Value::String(err.kind)),
        Value::Error(err) if field == "message" => Ok(Value::String(err.message)),
        other => Err(RuntimeError::type_mismatch(
            format!("field access `.{}`", field),
            "object",
            &other,
        )),
    }
}

pub fn index_of(value: Value, index: Value) -> RuntimeResult<Value> {
    match (value, index) {
        (Value::Array(mut items), Value::Integer(i)) => {
            let len = items.len();
            if i >= 0 && (i as usize) < len {
                Ok(items.swap_remove(i as usize))
            } else {
                Err(RuntimeError::TypeMismatch {
                    operand: "array index".to_string(),
                    expected: format!("index in 0..{}", len),
                    actual: i.to_string(),
                })
            }
        }
        (Value::Object(map), Value::String(key)) => field_of(Value::Object(map), &key),
        (Value::Array(_), other) => Err(RuntimeError::type_mismatch("array index", "integer", &other)),
        (Value::Object(_), other) => Err(RuntimeError::type_mismatch("object index", "string", &other)),
        (other, _) => Err(RuntimeError::type_mismatch("indexed value", "array or object", &other)),
    }
}
