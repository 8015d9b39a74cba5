mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use common::{eval, eval_unchecked, eval_with};
use flowscript::parser::{parse_expression, ParseErrorKind};
use flowscript::runtime::{
    ErrorKind, EvaluatorConfig, RuntimeError, ScriptedBackend, ScriptedReply, Value,
};

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(future)
}

proptest! {
    #[test]
    fn pipe_is_left_to_right_application(x in -1_000_000i64..1_000_000) {
        let prelude = "let f = fun(n) => n * 3, g = fun(n) => n - 7 in";
        let piped = block_on(eval(&format!("{} {} >> f >> g", prelude, x))).unwrap();
        let nested = block_on(eval(&format!("{} g(f({}))", prelude, x))).unwrap();
        prop_assert_eq!(piped, nested);
    }

    #[test]
    fn pipe_into_call_prepends_the_subject(words in proptest::collection::vec("[a-z]{1,6}", 0..5)) {
        let literal = format!("{:?}", words);
        let piped = block_on(eval(&format!("{} >> append(\"end\") >> join(\"-\")", literal))).unwrap();
        let nested = block_on(eval(&format!("join(append({}, \"end\"), \"-\")", literal))).unwrap();
        prop_assert_eq!(piped, nested);
    }
}

#[tokio::test]
async fn pipe_into_object_literal_binds_the_subject() {
    let value = eval(r#"let n = 2 in n * 5 >> {value: $, doubled: $ * 2, n: n}"#)
        .await
        .unwrap();
    assert_eq!(
        value,
        Value::object([
            ("value", Value::Integer(10)),
            ("doubled", Value::Integer(20)),
            ("n", Value::Integer(2)),
        ])
    );
}

#[tokio::test]
async fn let_is_sequential_and_shadows() {
    assert_eq!(
        eval("let a = 1, b = a + 1, a = b * 10 in [a, b]").await.unwrap(),
        Value::Array(vec![Value::Integer(20), Value::Integer(2)])
    );
    let later = eval("let a = b, b = 1 in a").await.unwrap_err();
    assert!(matches!(later, RuntimeError::UnboundIdentifier { name } if name == "b"));
}

#[tokio::test]
async fn closures_capture_their_defining_scope() {
    let value = eval(
        "let make = fun(k) => fun(x) => x + k, add2 = make(2), k = 100 in add2(1)",
    )
    .await
    .unwrap();
    assert_eq!(value, Value::Integer(3));
}

#[tokio::test]
async fn defaults_fill_omitted_trailing_arguments() {
    let source = "let greet = fun(name, greeting = \"hello\") => greeting + \" \" + name in";
    assert_eq!(
        eval(&format!("{} greet(\"ada\")", source)).await.unwrap(),
        Value::string("hello ada")
    );
    assert_eq!(
        eval(&format!("{} greet(\"ada\", \"hi\")", source)).await.unwrap(),
        Value::string("hi ada")
    );
    let err = eval(&format!("{} greet()", source)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[tokio::test]
async fn match_first_true_guard_wins_and_later_clauses_never_run() {
    let backend = Arc::new(ScriptedBackend::new().otherwise(ScriptedReply::text("probed")));
    let value = eval_with(
        r#"match {
            false => "first",
            true => "second",
            ("x" >> model("probe guard")) == "probed" => "x" >> model("probe body")
        }"#,
        &backend,
        EvaluatorConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(value, Value::string("second"));
    assert_eq!(backend.call_count("probe"), 0);
}

#[tokio::test]
async fn match_binds_the_scrutinee_and_falls_back_to_wildcard() {
    let source = |n: i64| {
        format!(
            "match {} as score {{ score >= 8 => \"great\", score >= 5 => \"fine\", _ => \"poor\" }}",
            n
        )
    };
    assert_eq!(eval(&source(9)).await.unwrap(), Value::string("great"));
    assert_eq!(eval(&source(5)).await.unwrap(), Value::string("fine"));
    assert_eq!(eval(&source(1)).await.unwrap(), Value::string("poor"));
}

#[tokio::test]
async fn match_without_a_satisfied_guard_is_no_match() {
    match eval("match ({a: 1}) as v { v.a == 2 => \"two\" }").await.unwrap_err() {
        RuntimeError::NoMatch { scrutinee } => assert_eq!(scrutinee, "{a: 1}"),
        other => panic!("expected no match, got {:?}", other),
    }
    assert_eq!(
        eval("match 3 { 1 => true }").await.unwrap_err().kind(),
        ErrorKind::TypeMismatch
    );
}

#[tokio::test]
async fn field_access_requires_an_existing_field() {
    assert_eq!(eval("{a: 1}.a").await.unwrap(), Value::Integer(1));
    let err = eval("{a: 1}.b").await.unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { ref operand, .. } if operand == "field access `.b`"));
    assert_eq!(eval("[1, 2].x").await.unwrap_err().kind(), ErrorKind::TypeMismatch);
    assert_eq!(
        eval("match { is-defined?({a: 1}.b) => 1, _ => 0 }").await.unwrap(),
        Value::Integer(0)
    );
}

#[tokio::test]
async fn operators() {
    assert_eq!(eval("1 + 2 * 3 - 4 / 2").await.unwrap(), Value::Integer(5));
    assert_eq!(eval("7 % 3 == 1 && !(2 > 3)").await.unwrap(), Value::Boolean(true));
    assert_eq!(eval("1 == 1.0").await.unwrap(), Value::Boolean(true));
    assert_eq!(eval("\"a\" + \"b\"").await.unwrap(), Value::string("ab"));
    assert_eq!(eval("1 / 0").await.unwrap_err().kind(), ErrorKind::DivisionByZero);
    // The right operand is never evaluated.
    assert_eq!(eval("false && missing").await.unwrap(), Value::Boolean(false));
    assert_eq!(eval("1 && true").await.unwrap_err().kind(), ErrorKind::TypeMismatch);
}

#[tokio::test]
async fn loop_runs_ten_thousand_iterations() {
    let value = eval("loop(0, fun(n) => match { n >= 10000 => n, _ => recur(n + 1) })")
        .await
        .unwrap();
    assert_eq!(value, Value::Integer(10000));
}

#[tokio::test]
async fn recur_through_let_bodies_is_in_tail_position() {
    let value = eval(
        "loop({i: 0, acc: []}, fun(s) => let next = s.i + 1 in match { next > 3 => s.acc, _ => recur({i: next, acc: append(s.acc, next)}) })",
    )
    .await
    .unwrap();
    assert_eq!(
        value,
        Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)])
    );
}

#[test]
fn misplaced_recur_is_rejected_statically() {
    for source in [
        "recur(1)",
        "let x = 1 in recur(x)",
        "loop(0, fun(s) => let f = fun(x) => recur(x) in f(s))",
    ] {
        let err = parse_expression(source).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::RecurOutsideLoop, "{}", source);
    }
}

#[tokio::test]
async fn misplaced_recur_fails_at_runtime_when_unchecked() {
    for source in [
        "recur(1)",
        "let x = 1 in recur(x)",
        "loop(0, fun(s) => let f = fun(x) => recur(x) in f(s))",
        "loop(0, fun(s) => recur(s) + 1)",
    ] {
        let err = eval_unchecked(source).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecurOutsideLoop, "{}", source);
    }
}

#[tokio::test]
async fn errors_inside_loops_keep_the_last_state() {
    let err = eval("loop({n: 0}, fun(s) => match { s.n == 2 => s.missing, _ => recur({n: s.n + 1}) })")
        .await
        .unwrap_err();
    match &err {
        RuntimeError::LoopAborted {
            iteration,
            last_state,
            ..
        } => {
            assert_eq!(*iteration, 3);
            assert_eq!(*last_state, Value::object([("n", Value::Integer(2))]));
        }
        other => panic!("expected loop abort, got {:?}", other),
    }
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[tokio::test]
async fn deep_recursion_is_bounded() {
    let backend = Arc::new(ScriptedBackend::new());
    let config = EvaluatorConfig {
        max_call_depth: 40,
        ..EvaluatorConfig::default()
    };
    let source = "let down = fun(n, self) => self(n + 1, self) in down(0, down)";
    let err = eval_with(source, &backend, config.clone()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::StackOverflow { depth: 40 }));

    let shallow = "let count = fun(n, self) => match { n == 0 => 0, _ => 1 + self(n - 1, self) } in count(30, count)";
    assert_eq!(
        eval_with(shallow, &backend, config).await.unwrap(),
        Value::Integer(30)
    );
}

#[tokio::test]
async fn recursion_reaches_the_default_depth_limit_without_overflowing() {
    let backend = Arc::new(ScriptedBackend::new());
    let limit = EvaluatorConfig::default().max_call_depth;
    let count = |n: usize| {
        format!(
            "let count = fun(n, self) => match {{ n == 0 => 0, _ => 1 + self(n - 1, self) }} in count({}, count)",
            n
        )
    };

    // count(n) needs n + 1 nested calls.
    let deepest = eval_with(&count(limit - 1), &backend, EvaluatorConfig::default())
        .await
        .unwrap();
    assert_eq!(deepest, Value::Integer(limit as i64 - 1));

    let err = eval_with(&count(limit), &backend, EvaluatorConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::StackOverflow { depth } if depth == limit));
}

#[tokio::test]
async fn try_turns_model_failures_into_error_values() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("refuse", [ScriptedReply::Permanent("policy".into())])
            .on("prose", [ScriptedReply::text("not json")]),
    );
    let source = r#"
        let refused = try("x" >> model("refuse this")),
            garbled = try("x" >> model("prose please") >> object())
        in {
            refused: match { is-error?(refused) => refused.kind, _ => "ok" },
            garbled: garbled.kind
        }"#;
    let value = eval_with(source, &backend, EvaluatorConfig::default())
        .await
        .unwrap();
    assert_eq!(
        value,
        Value::object([
            ("refused", Value::string("permanent")),
            ("garbled", Value::string("parse_error")),
        ])
    );

    // Structural errors are not caught.
    let err = eval("try({a: 1}.b)").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[tokio::test]
async fn independent_bindings_match_sequential_results() {
    let source = r#"
        let script = "a short film",
            storyboard = script >> model("storyboard for {{input}}"),
            voice = script >> model("voice for {{input}}"),
            package = {storyboard: storyboard, voice: voice, title: script}
        in package"#;
    let make_backend = || {
        Arc::new(
            ScriptedBackend::new()
                .on("storyboard", [ScriptedReply::text("frames")])
                .on("voice", [ScriptedReply::text("narrator")]),
        )
    };
    let parallel = eval_with(source, &make_backend(), EvaluatorConfig::default())
        .await
        .unwrap();
    let sequential = eval_with(
        source,
        &make_backend(),
        EvaluatorConfig {
            parallel_bindings: false,
            ..EvaluatorConfig::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(parallel, sequential);
    assert_eq!(
        parallel,
        Value::object([
            ("storyboard", Value::string("frames")),
            ("voice", Value::string("narrator")),
            ("title", Value::string("a short film")),
        ])
    );
}

#[tokio::test]
async fn unbound_identifiers_and_bad_calls() {
    assert!(matches!(
        eval("nowhere + 1").await.unwrap_err(),
        RuntimeError::UnboundIdentifier { name } if name == "nowhere"
    ));
    assert_eq!(eval("3(1)").await.unwrap_err().kind(), ErrorKind::TypeMismatch);
    assert_eq!(
        eval("(fun(a) => a)(1, 2)").await.unwrap_err().kind(),
        ErrorKind::TypeMismatch
    );
}
