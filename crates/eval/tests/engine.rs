//! End-to-end behavior of the engine: ordering, switch semantics,
//! scoring, error reporting and call isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ruleform_eval::{Category, Engine, EvalError, FunctionMeta, Value};
use serde_json::{json, Value as Json};

fn eval(rules: &Json, inputs: Json) -> Result<ruleform_eval::Evaluation, EvalError> {
    Engine::new().evaluate(rules, &inputs)
}

fn grade_rules() -> Json {
    json!([{
        "id": "grade",
        "switch": "score",
        "when": [
            { "if": ">= 80", "result": "A" },
            { "if": ">= 70", "result": "B" },
            { "if": ">= 60", "result": "C" }
        ],
        "default": "F"
    }])
}

// ──────────────────────────────────────────────
// Ordering
// ──────────────────────────────────────────────

#[test]
fn formulas_run_after_their_dependencies_in_a_stable_order() {
    let rules = json!([
        { "id": "d", "formula": "$b + $c" },
        { "id": "c", "formula": "$a * 2" },
        { "id": "b", "formula": "$a + 1" },
        { "id": "a", "formula": "x" },
        { "id": "e", "formula": "x * 10" }
    ]);
    let engine = Engine::new();
    let first = engine.evaluate(&rules, &json!({ "x": 3 })).unwrap();
    assert_eq!(first.order, vec!["a", "c", "b", "d", "e"]);
    assert_eq!(first.results["d"], Value::Number(10.0));

    for _ in 0..5 {
        engine.clear_cache();
        let again = engine.evaluate(&rules, &json!({ "x": 3 })).unwrap();
        assert_eq!(again.order, first.order);
    }
}

#[test]
fn cycles_fail_before_any_formula_executes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = Engine::new();
    let counter = calls.clone();
    engine.register_function(
        FunctionMeta::new("tally", Category::Custom, "counts calls").exact(0),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Number(1.0))
        },
    );
    let rules = json!([
        { "id": "first", "formula": "tally()" },
        { "id": "a", "formula": "$c + 1" },
        { "id": "b", "formula": "$a + 1" },
        { "id": "c", "formula": "$b + 1" }
    ]);
    let err = engine.evaluate(&rules, &json!({})).unwrap_err();
    assert_eq!(err.kind(), "cyclic_dependency");
    assert_eq!(
        err.to_string(),
        "cyclic dependency between formulas: a -> b -> c -> a"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ──────────────────────────────────────────────
// Switch and condition semantics
// ──────────────────────────────────────────────

#[test]
fn first_matching_clause_wins() {
    let rules = grade_rules();
    for (score, grade) in [(85, "A"), (72, "B"), (60, "C"), (55, "F")] {
        let out = eval(&rules, json!({ "score": score })).unwrap();
        assert_eq!(out.results["grade"], Value::from(grade), "score {}", score);
    }
}

#[test]
fn collateral_compensates_for_low_income() {
    let rules = json!([{
        "id": "approved",
        "when": [{
            "if": { "and": [
                { "var": "age", "op": "gt", "value": 25 },
                { "or": [
                    { "var": "income", "op": "gt", "value": 30000 },
                    { "var": "has_collateral", "op": "eq", "value": true }
                ]}
            ]},
            "result": true
        }],
        "default": false
    }]);
    let ok = eval(&rules, json!({ "age": 30, "income": 25000, "has_collateral": true })).unwrap();
    assert_eq!(ok.results["approved"], Value::Bool(true));
    let no = eval(&rules, json!({ "age": 30, "income": 25000, "has_collateral": false })).unwrap();
    assert_eq!(no.results["approved"], Value::Bool(false));
}

#[test]
fn list_bounds_may_reference_computed_values() {
    let rules = json!([
        { "id": "band", "switch": "score", "when": [
            { "if": { "op": "between", "value": ["$lo", 40] }, "result": "mid" },
            { "if": { "op": "in", "value": ["$lo", 0] }, "result": "floor" }
        ], "default": "out" },
        { "id": "lo", "formula": "base / 2" }
    ]);
    for (score, band) in [(15, "mid"), (40, "mid"), (14, "out"), (41, "out"), (0, "floor")] {
        let out = eval(&rules, json!({ "score": score, "base": 30 })).unwrap();
        assert_eq!(out.order, ["lo", "band"]);
        assert_eq!(out.results["band"], Value::from(band), "score {}", score);
    }
    let zero = eval(&rules, json!({ "score": 0, "base": 0 })).unwrap();
    assert_eq!(zero.results["band"], Value::from("mid"));
}

#[test]
fn set_vars_apply_in_declaration_order() {
    let rules = json!([{
        "id": "tier",
        "switch": "spend",
        "when": [{
            "if": ">= 100",
            "result": "gold",
            "set_vars": { "$base": "spend / 10", "$bonus": "$base * 2", "$total": "$base + $bonus + $tier_points", "$tier_points": 5 }
        }]
    }]);
    let out = eval(&rules, json!({ "spend": 200, "tier_points": 1 })).unwrap();
    assert_eq!(out.results["base"], Value::Number(20.0));
    assert_eq!(out.results["bonus"], Value::Number(40.0));
    // `tier_points` is read before its own assignment, so the input wins.
    assert_eq!(out.results["total"], Value::Number(61.0));
    assert_eq!(out.results["tier_points"], Value::Number(5.0));
}

#[test]
fn set_vars_see_the_primary_value_of_their_formula() {
    let rules = json!([{
        "id": "level",
        "switch": "points",
        "when": [{ "if": "> 10", "result": 3, "set_vars": { "$next": "$level + 1" } }],
        "default": 1
    }]);
    let out = eval(&rules, json!({ "points": 50 })).unwrap();
    assert_eq!(out.results["next"], Value::Number(4.0));
}

#[test]
fn switch_without_match_or_default_is_an_error() {
    let rules = json!([{
        "id": "grade",
        "switch": "score",
        "when": [{ "if": ">= 50", "result": "pass" }]
    }]);
    let err = eval(&rules, json!({ "score": 10 })).unwrap_err();
    assert_eq!(err.kind(), "no_match");
    assert_eq!(err.formula(), Some("grade"));
}

// ──────────────────────────────────────────────
// Scoring
// ──────────────────────────────────────────────

#[test]
fn fully_qualifying_inputs_score_exactly_100() {
    let rules = json!([{
        "id": "score",
        "scoring": { "rules": [
            { "var": "income", "ranges": [{ "if": ">= 50000", "score": 40 }, { "if": ">= 20000", "score": 10 }] },
            { "var": "age", "if": { "op": "between", "value": [25, 60] }, "score": 20 },
            { "var": "tenure", "ranges": [{ "if": ">= 5", "score": 25 }] },
            { "var": "region", "if": { "op": "in", "value": ["north", "west"] }, "score": 15 }
        ]}
    }]);
    let out = eval(
        &rules,
        json!({ "income": 65000, "age": 40, "tenure": 8, "region": "west" }),
    )
    .unwrap();
    assert_eq!(out.results["score"], Value::Number(100.0));

    let partial = eval(
        &rules,
        json!({ "income": 25000, "age": 19, "tenure": 8, "region": "south" }),
    )
    .unwrap();
    assert_eq!(partial.results["score"], Value::Number(35.0));
}

fn loan_tree(with_default: bool) -> Json {
    let mut scoring = json!({
        "dimensions": ["credit", "income"],
        "tree": [
            { "if": ">= 700", "children": [
                { "if": ">= 50000", "score": 90, "decision": "approve" },
                { "score": 60, "decision": "review" }
            ]},
            { "if": ">= 600", "children": [
                { "if": ">= 90000", "score": 55, "decision": "review" }
            ]}
        ]
    });
    if with_default {
        scoring["default"] = json!({ "score": 0, "decision": "decline" });
    }
    json!([{ "id": "loan", "scoring": scoring }])
}

#[test]
fn tree_level_without_match_uses_the_default_leaf() {
    let out = eval(&loan_tree(true), json!({ "credit": 650, "income": 40000 })).unwrap();
    assert_eq!(out.results["loan"], Value::Number(0.0));
    assert_eq!(out.results["loan_decision"], Value::from("decline"));
    assert!(!out.results.contains_key("loan_level"));

    let hit = eval(&loan_tree(true), json!({ "credit": 720, "income": 40000 })).unwrap();
    assert_eq!(hit.results["loan"], Value::Number(60.0));
}

#[test]
fn tree_level_without_match_or_default_is_an_error() {
    let err = eval(&loan_tree(false), json!({ "credit": 650, "income": 40000 })).unwrap_err();
    assert_eq!(err.kind(), "no_match");
    assert!(err.to_string().contains("income = 40000"), "{}", err);
}

// ──────────────────────────────────────────────
// Expressions and errors
// ──────────────────────────────────────────────

#[test]
fn price_times_quantity_with_tax() {
    let rules = json!([{ "id": "total", "formula": "price * quantity * (1 + tax_rate)" }]);
    let out = eval(&rules, json!({ "price": 100, "quantity": 2, "tax_rate": 0.1 })).unwrap();
    let total = out.results["total"].as_number().unwrap();
    assert!((total - 220.0).abs() < 1e-9);
}

#[test]
fn missing_declared_input_names_it_and_produces_no_results() {
    let rules = json!([
        { "id": "ok", "formula": "a * 2" },
        { "id": "sum", "formula": "a", "inputs": ["a", "b"] }
    ]);
    let err = eval(&rules, json!({ "a": 1 })).unwrap_err();
    assert_eq!(
        err,
        EvalError::MissingInput {
            formula: "sum".into(),
            name: "b".into(),
            intermediate: false
        }
    );
    let envelope = err.to_json();
    assert_eq!(envelope["success"], json!(false));
    assert!(envelope.get("results").is_none());
}

#[test]
fn negative_square_root_is_an_evaluation_error() {
    let rules = json!([{ "id": "root", "formula": "1 + sqrt(-4)" }]);
    match eval(&rules, json!({})).unwrap_err() {
        EvalError::Evaluation { formula, message, expr } => {
            assert_eq!(formula, "root");
            assert!(message.starts_with("sqrt():"), "{}", message);
            assert_eq!(expr, "sqrt(-4)");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn unknown_function_and_missing_intermediate() {
    let err = eval(&json!([{ "id": "x", "formula": "mystery(1)" }]), json!({})).unwrap_err();
    assert_eq!(err.kind(), "unknown_function");
    let err = eval(&json!([{ "id": "x", "formula": "$ghost + 1" }]), json!({})).unwrap_err();
    assert_eq!(err.kind(), "missing_input");
}

#[test]
fn invalid_documents_report_every_problem() {
    let rules = json!([
        { "id": "a", "formula": "1 +" },
        { "formula": "2" },
        { "id": "c", "formula": "1", "switch": "x", "when": [] }
    ]);
    match eval(&rules, json!({})).unwrap_err() {
        EvalError::Config(ruleform_core::ConfigError::Invalid { errors }) => {
            assert_eq!(errors.len(), 3)
        }
        other => panic!("unexpected {:?}", other),
    }
}

// ──────────────────────────────────────────────
// Call isolation
// ──────────────────────────────────────────────

#[test]
fn repeated_evaluations_are_identical() {
    let engine = Engine::new();
    let rules = json!([
        { "id": "grade", "switch": "score", "when": [{ "if": ">= 50", "result": "pass", "set_vars": { "$passed": true } }], "default": "fail" }
    ]);
    let pass = engine.evaluate(&rules, &json!({ "score": 90 })).unwrap();
    let fail = engine.evaluate(&rules, &json!({ "score": 10 })).unwrap();
    assert!(!fail.results.contains_key("passed"));
    let pass_again = engine.evaluate(&rules, &json!({ "score": 90 })).unwrap();
    assert_eq!(pass.results, pass_again.results);
    assert_eq!(engine.cached_plans(), 1);
}

#[test]
fn one_engine_serves_concurrent_callers() {
    let engine = Engine::new();
    let rules = grade_rules();
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = &engine;
                let rules = &rules;
                s.spawn(move || {
                    let score = 50 + i * 5;
                    engine.evaluate(rules, &json!({ "score": score })).map(|o| o.results)
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
    });
}
