#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use flowscript::parser::{parse_expression, parse_expression_unchecked};
use flowscript::runtime::{
    EffectDispatcher, Environment, Evaluator, EvaluatorConfig, JsonGrammar, RetryPolicy,
    RuntimeResult, ScriptedBackend, StandardLibrary, Value, Workflow, WorkflowRunner,
};

/// Millisecond backoff keeps retry tests fast on a real clock.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        timeout: Duration::from_secs(60),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

pub fn dispatcher(backend: &Arc<ScriptedBackend>, policy: RetryPolicy) -> Arc<EffectDispatcher> {
    Arc::new(EffectDispatcher::new(backend.clone()).with_policy(policy))
}

pub fn globals() -> Arc<Environment> {
    Arc::new(StandardLibrary::create_global_environment(Arc::new(JsonGrammar)))
}

pub async fn eval_with(
    source: &str,
    backend: &Arc<ScriptedBackend>,
    config: EvaluatorConfig,
) -> RuntimeResult<Value> {
    let expr = parse_expression(source).expect("Should parse");
    let evaluator = Evaluator::new(dispatcher(backend, fast_policy(3))).with_config(config);
    evaluator.eval_expr(&expr, &globals()).await
}

pub async fn eval(source: &str) -> RuntimeResult<Value> {
    eval_with(source, &Arc::new(ScriptedBackend::new()), EvaluatorConfig::default()).await
}

/// Evaluates without the static `recur` check.
pub async fn eval_unchecked(source: &str) -> RuntimeResult<Value> {
    let expr = parse_expression_unchecked(source).expect("Should parse");
    let backend = Arc::new(ScriptedBackend::new());
    let evaluator = Evaluator::new(dispatcher(&backend, fast_policy(3)));
    evaluator.eval_expr(&expr, &globals()).await
}

pub fn runner(source: &str, backend: &Arc<ScriptedBackend>, policy: RetryPolicy) -> WorkflowRunner {
    let workflow = Workflow::from_source(source).expect("Should parse");
    WorkflowRunner::new(workflow, dispatcher(backend, policy), EvaluatorConfig::default())
}

pub fn json_text(value: serde_json::Value) -> String {
    value.to_string()
}
