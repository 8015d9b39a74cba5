mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{fast_policy, json_text, runner};
use flowscript::runtime::{
    ErrorKind, EvaluatorConfig, RefinementReport, RefinementStatus, ScriptedBackend,
    ScriptedReply, Value, WorkflowError,
};

const FEEDBACK_LOOP: &str = include_str!("../demos/feedback_loop.flow");
const SEQUENTIAL_PIPELINE: &str = include_str!("../demos/sequential_pipeline.flow");
const MESH: &str = include_str!("../demos/mesh.flow");
const MIXTURE_OF_EXPERTS: &str = include_str!("../demos/mixture_of_experts.flow");
const HIERARCHICAL: &str = include_str!("../demos/hierarchical.flow");

fn verdict(met: bool, feedback: &str) -> ScriptedReply {
    ScriptedReply::Text(json_text(json!({"criteria_met": met, "feedback": feedback})))
}

fn refinement_backend(verdicts: Vec<ScriptedReply>) -> Arc<ScriptedBackend> {
    Arc::new(
        ScriptedBackend::new()
            .on("Write content for", [ScriptedReply::text("draft 1")])
            .on(
                "Revise the content",
                [ScriptedReply::text("draft 2"), ScriptedReply::text("draft 3")],
            )
            .on("Judge the content", verdicts),
    )
}

fn refinement_input(max_iterations: i64) -> serde_json::Value {
    json!({
        "task": "a product tagline",
        "criteria": "under ten words",
        "max_iterations": max_iterations
    })
}

#[tokio::test]
async fn feedback_loop_stops_when_criteria_are_met() {
    let backend = refinement_backend(vec![
        verdict(false, "too long"),
        verdict(false, "still long"),
        verdict(true, ""),
    ]);
    let runner = runner(FEEDBACK_LOOP, &backend, fast_policy(3));
    let out = runner.run(Value::from(refinement_input(5))).await.unwrap();

    let report = RefinementReport::from_value(&out).unwrap();
    assert_eq!(report.status, RefinementStatus::Success);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.history.len(), 3);
    assert_eq!(report.final_content, json!("draft 3"));
    assert_eq!(report.history[0].content, json!("draft 1"));
    assert_eq!(backend.call_count("Judge the content"), 3);

    // The second draft was asked for with the first critique.
    let revise_prompts: Vec<String> = backend
        .calls()
        .into_iter()
        .filter(|c| c.template.contains("Revise"))
        .map(|c| c.prompt)
        .collect();
    assert!(revise_prompts[0].ends_with("using this feedback: too long"));
}

#[tokio::test]
async fn feedback_loop_reports_exhaustion_as_a_normal_result() {
    let backend = refinement_backend(vec![verdict(false, "no")]);
    let runner = runner(FEEDBACK_LOOP, &backend, fast_policy(3));
    let out = runner.run(Value::from(refinement_input(3))).await.unwrap();

    let report = RefinementReport::from_value(&out).unwrap();
    assert_eq!(report.status, RefinementStatus::MaxIterations);
    assert_eq!(report.iterations, 3);
    assert_eq!(
        report.history.iter().map(|h| h.iteration).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn fatal_errors_carry_the_partial_history() {
    let backend = refinement_backend(vec![
        verdict(false, "too long"),
        ScriptedReply::text("I think it is fine now."),
    ]);
    let runner = runner(FEEDBACK_LOOP, &backend, fast_policy(3));
    let err = runner.run(Value::from(refinement_input(5))).await.unwrap_err();

    let cause = err.cause().expect("runtime error");
    assert_eq!(cause.kind(), ErrorKind::Model);
    assert_eq!(cause.model_error().map(|e| e.kind_name()), Some("parse_error"));
    match err.partial_history() {
        Some(Value::Array(entries)) => {
            assert_eq!(entries.len(), 1);
            assert_eq!(
                entries[0].as_object().and_then(|e| e.get("content")),
                Some(&Value::string("draft 1"))
            );
        }
        other => panic!("expected partial history, got {:?}", other),
    }
}

#[tokio::test]
async fn sequential_pipeline_feeds_each_stage_into_the_next() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("Research the topic", [ScriptedReply::text("facts")])
            .on("Outline an article", [ScriptedReply::text("outline")])
            .on("Draft the article", [ScriptedReply::text("article")]),
    );
    let out = runner(SEQUENTIAL_PIPELINE, &backend, fast_policy(3))
        .run_json(json!({"topic": "tides"}))
        .await
        .unwrap();
    assert_eq!(out, json!({"topic": "tides", "article": "article"}));

    let prompts: Vec<String> = backend.calls().into_iter().map(|c| c.prompt).collect();
    assert_eq!(
        prompts,
        vec![
            "Research the topic tides and list the key facts",
            "Outline an article from these facts: facts",
            "Draft the article following this outline: outline",
        ]
    );
}

#[tokio::test]
async fn mesh_synthesizes_every_perspective() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("As the engineer", [ScriptedReply::text("cache it")])
            .on("As the designer", [ScriptedReply::text("simplify it")])
            .on("As the analyst", [ScriptedReply::text("measure it")])
            .on("Synthesize", [ScriptedReply::text("plan")]),
    );
    let out = runner(MESH, &backend, fast_policy(3))
        .run_json(json!({"problem": "slow checkout"}))
        .await
        .unwrap();
    assert_eq!(
        out,
        json!({
            "proposals": ["cache it", "simplify it", "measure it"],
            "plan": "plan"
        })
    );
    let synthesis = backend
        .calls()
        .into_iter()
        .find(|c| c.template.contains("Synthesize"))
        .expect("synthesis call");
    assert!(synthesis.prompt.contains("cache it\n---\nsimplify it\n---\nmeasure it"));
}

#[tokio::test]
async fn mixture_of_experts_routes_to_the_matching_specialist() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("Classify the query", [ScriptedReply::text(r#"{"domain": "code"}"#)])
            .on("mathematician", [ScriptedReply::text("42")])
            .on("senior engineer", [ScriptedReply::text("fn main() {}")])
            .on("careful writer", [ScriptedReply::text("prose")]),
    );
    let out = runner(MIXTURE_OF_EXPERTS, &backend, fast_policy(3))
        .run_json(json!({"query": "write a hello world"}))
        .await
        .unwrap();
    assert_eq!(out, json!({"domain": "code", "answer": "fn main() {}"}));
    assert_eq!(backend.call_count("mathematician"), 0);
    assert_eq!(backend.call_count("careful writer"), 0);
}

#[tokio::test]
async fn hierarchical_manager_fans_out_to_workers() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("Break the goal", [ScriptedReply::text(r#"["research", "write"]"#)])
            .on("Complete the subtask", [ScriptedReply::text("r1"), ScriptedReply::text("r2")])
            .on("Combine the worker results", [ScriptedReply::text("final report")]),
    );
    let out = runner(HIERARCHICAL, &backend, fast_policy(3))
        .run_json(json!({"goal": "launch"}))
        .await
        .unwrap();
    assert_eq!(
        out,
        json!({
            "goal": "launch",
            "subtasks": ["research", "write"],
            "results": ["r1", "r2"],
            "report": "final report"
        })
    );
}

#[tokio::test]
async fn workflows_without_a_usable_main_are_rejected() {
    let backend = Arc::new(ScriptedBackend::new());
    for source in ["fun helper(x) => x", "fun main() => 1", "fun main(a, b) => a"] {
        let err = runner(source, &backend, fast_policy(1))
            .run(Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Entry(_)), "{}", source);
    }
}

#[tokio::test]
async fn deep_top_level_recursion_fails_cleanly() {
    let source = "fun count(n) => match { n == 0 => 0, _ => 1 + count(n - 1) }\nfun main(x) => count(x)";
    let backend = Arc::new(ScriptedBackend::new());
    let limit = EvaluatorConfig::default().max_call_depth as i64;
    let runner = runner(source, &backend, fast_policy(1));

    let out = runner.run(Value::Integer(limit - 10)).await.unwrap();
    assert_eq!(out, Value::Integer(limit - 10));

    let err = runner.run(Value::Integer(limit + 10)).await.unwrap_err();
    assert_eq!(err.cause().map(|c| c.kind()), Some(ErrorKind::StackOverflow));
}

#[test]
fn malformed_programs_fail_to_load() {
    let err = flowscript::Workflow::from_source("fun main(x) => {a: 1, a: 2}").unwrap_err();
    assert!(matches!(err, WorkflowError::Parse(_)));
    let err = flowscript::Workflow::from_source("fun main(x) => (x").unwrap_err();
    assert!(matches!(err, WorkflowError::Parse(_)));
}
