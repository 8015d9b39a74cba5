//! Workflow runner: binds a program's `main` to caller input.
//!
//! A [`Workflow`] is parsed and validated once. A [`WorkflowRunner`] owns the
//! program's root environment and evaluator and can be run any number of
//! times; runs share nothing but the dispatcher's sequence counter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::ast::{FnDef, Program, Symbol};
use crate::parser::{parse_program, ParseError};
use crate::runtime::dispatcher::EffectDispatcher;
use crate::runtime::environment::{create_program_environment, Environment};
use crate::runtime::error::RuntimeError;
use crate::runtime::evaluator::{Evaluator, EvaluatorConfig};
use crate::runtime::stdlib::StandardLibrary;
use crate::runtime::values::Value;

pub const ENTRY_POINT: &str = "main";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invalid entry point: {0}")]
    Entry(String),
    /// A fatal evaluation error. `partial_history` holds the `history` field of
    /// the outermost aborted loop state, when there was one.
    #[error("{cause}")]
    Runtime {
        cause: RuntimeError,
        partial_history: Option<Value>,
    },
}

impl WorkflowError {
    pub fn cause(&self) -> Option<&RuntimeError> {
        match self {
            WorkflowError::Runtime { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn partial_history(&self) -> Option<&Value> {
        match self {
            WorkflowError::Runtime {
                partial_history, ..
            } => partial_history.as_ref(),
            _ => None,
        }
    }
}

impl From<RuntimeError> for WorkflowError {
    fn from(cause: RuntimeError) -> Self {
        let partial_history = cause
            .loop_states()
            .into_iter()
            .find_map(|state| state.as_object().and_then(|o| o.get("history")))
            .cloned();
        WorkflowError::Runtime {
            cause,
            partial_history,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    program: Arc<Program>,
}

impl Workflow {
    pub fn from_source(source: &str) -> Result<Self, WorkflowError> {
        Ok(Workflow::from_program(parse_program(source)?))
    }

    pub fn from_program(program: Program) -> Self {
        Workflow {
            program: Arc::new(program),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The `main` definition, which must accept exactly one argument.
    pub fn entry(&self) -> Result<&Arc<FnDef>, WorkflowError> {
        let main = self
            .program
            .function(ENTRY_POINT)
            .ok_or_else(|| WorkflowError::Entry(format!("no `{}` function defined", ENTRY_POINT)))?;
        if !main.accepts(1) {
            return Err(WorkflowError::Entry(format!(
                "`{}` must accept a single input, it declares {} parameter(s) with {} required",
                ENTRY_POINT,
                main.params.len(),
                main.required_params()
            )));
        }
        Ok(main)
    }
}

#[derive(Debug)]
pub struct WorkflowRunner {
    workflow: Workflow,
    evaluator: Evaluator,
    root: Arc<Environment>,
}

impl WorkflowRunner {
    pub fn new(workflow: Workflow, dispatcher: Arc<EffectDispatcher>, config: EvaluatorConfig) -> Self {
        let globals = Arc::new(StandardLibrary::create_global_environment(dispatcher.grammar()));
        let root = create_program_environment(workflow.program(), globals);
        WorkflowRunner {
            workflow,
            evaluator: Evaluator::new(dispatcher).with_config(config),
            root,
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub async fn run(&self, input: Value) -> Result<Value, WorkflowError> {
        self.workflow.entry()?;
        let main = self.root.lookup(&Symbol::new(ENTRY_POINT))?;
        info!(input = input.type_name(), "workflow started");
        match self.evaluator.call_function(main, vec![input], &self.root).await {
            Ok(value) => {
                info!(
                    result = value.type_name(),
                    invocations = self.evaluator.dispatcher().invocations(),
                    "workflow finished"
                );
                Ok(value)
            }
            Err(err) => {
                let err = WorkflowError::from(err);
                warn!(
                    error = %err,
                    partial_history = err.partial_history().is_some(),
                    "workflow failed"
                );
                Err(err)
            }
        }
    }

    /// JSON in, JSON out. Results holding functions or model handles fail with
    /// a type mismatch.
    pub async fn run_json(&self, input: serde_json::Value) -> Result<serde_json::Value, WorkflowError> {
        let value = self.run(Value::from(input)).await?;
        Ok(value.to_json()?)
    }
}

// --- Iterative results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStatus {
    Success,
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u64,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub evaluation: serde_json::Value,
}

/// `{status, final_content, iterations, history}` as returned by feedback loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementReport {
    pub status: RefinementStatus,
    #[serde(default)]
    pub final_content: serde_json::Value,
    pub iterations: u64,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("result cannot be converted to JSON: {0}")]
    NotData(#[from] RuntimeError),
    #[error("result is not a refinement report: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("history entry {position} has iteration {found}, expected {expected}")]
    OutOfOrder {
        position: usize,
        expected: u64,
        found: u64,
    },
    #[error("report claims {iterations} iterations but history has {entries} entries")]
    CountMismatch { iterations: u64, entries: usize },
}

impl RefinementReport {
    pub fn from_value(value: &Value) -> Result<Self, ReportError> {
        let report: RefinementReport = serde_json::from_value(value.to_json()?)?;
        report.check_history()?;
        Ok(report)
    }

    /// History iterations must run `1..=iterations` with one entry each.
    pub fn check_history(&self) -> Result<(), ReportError> {
        for (position, entry) in self.history.iter().enumerate() {
            let expected = position as u64 + 1;
            if entry.iteration != expected {
                return Err(ReportError::OutOfOrder {
                    position,
                    expected,
                    found: entry.iteration,
                });
            }
        }
        if self.history.len() as u64 != self.iterations {
            return Err(ReportError::CountMismatch {
                iterations: self.iterations,
                entries: self.history.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::echo_host::EchoBackend;
    use pretty_assertions::assert_eq;

    fn runner(source: &str) -> WorkflowRunner {
        let workflow = Workflow::from_source(source).expect("Should parse");
        let dispatcher = Arc::new(EffectDispatcher::new(Arc::new(EchoBackend::new())));
        WorkflowRunner::new(workflow, dispatcher, EvaluatorConfig::default())
    }

    #[tokio::test]
    async fn runs_main_with_json_input() {
        let runner = runner("fun main(input) => {greeting: \"hi \" + input.name}");
        let out = runner
            .run_json(serde_json::json!({"name": "ada"}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"greeting": "hi ada"}));
    }

    #[tokio::test]
    async fn entry_point_must_exist_and_take_one_argument() {
        let missing = runner("fun start(x) => x").run(Value::Null).await;
        assert!(matches!(missing, Err(WorkflowError::Entry(_))));

        let binary = runner("fun main(a, b) => a").run(Value::Null).await;
        assert!(matches!(binary, Err(WorkflowError::Entry(_))));

        let defaulted = runner("fun main(a, b = 2) => a + b")
            .run(Value::Integer(1))
            .await
            .unwrap();
        assert_eq!(defaulted, Value::Integer(3));
    }

    #[test]
    fn report_history_must_be_in_order() {
        let report = |iterations: &[u64], claimed: u64| RefinementReport {
            status: RefinementStatus::Success,
            final_content: serde_json::Value::Null,
            iterations: claimed,
            history: iterations
                .iter()
                .map(|&iteration| HistoryEntry {
                    iteration,
                    content: serde_json::Value::Null,
                    evaluation: serde_json::Value::Null,
                })
                .collect(),
        };
        assert!(report(&[1, 2, 3], 3).check_history().is_ok());
        assert!(matches!(
            report(&[1, 3], 2).check_history(),
            Err(ReportError::OutOfOrder { position: 1, .. })
        ));
        assert!(matches!(
            report(&[1, 2], 3).check_history(),
            Err(ReportError::CountMismatch { .. })
        ));
    }

    #[test]
    fn report_decodes_status_names() {
        let value = Value::from(serde_json::json!({
            "status": "max_iterations",
            "final_content": "draft",
            "iterations": 1,
            "history": [{"iteration": 1, "content": "draft", "evaluation": {"ok": false}}]
        }));
        let report = RefinementReport::from_value(&value).unwrap();
        assert_eq!(report.status, RefinementStatus::MaxIterations);
        assert_eq!(report.history[0].evaluation, serde_json::json!({"ok": false}));
    }
}
