//! Compiled rules must agree with the interpreter: same values on success,
//! same error kind and failing formula otherwise, at every optimization
//! level.

use std::path::{Path, PathBuf};

use ruleform_codegen::{compile, GenerateOptions, OptimizationLevel};
use ruleform_eval::{Category, Engine, EngineConfig, FunctionMeta, FunctionRegistry, Value};
use serde_json::{json, Value as Json};

const LEVELS: [OptimizationLevel; 2] = [OptimizationLevel::Basic, OptimizationLevel::Aggressive];

fn options(level: OptimizationLevel) -> GenerateOptions {
    GenerateOptions {
        optimization_level: level,
        ..GenerateOptions::default()
    }
}

fn assert_equivalent_with(registry: &FunctionRegistry, rules: &Json, inputs: &Json) {
    let engine = Engine::with_config(EngineConfig {
        cache_plans: false,
        ..EngineConfig::default()
    })
    .with_registry(registry.clone());
    let interpreted = engine.evaluate(rules, inputs).map(|e| e.results);

    for level in LEVELS {
        let compiled = compile(rules, registry, &options(level))
            .unwrap_or_else(|e| panic!("compile failed at {:?}: {}", level, e));
        let actual = compiled.run(inputs);
        match (&interpreted, &actual) {
            (Ok(expected), Ok(got)) => assert_eq!(
                got, expected,
                "results differ at {:?} for inputs {}",
                level, inputs
            ),
            (Err(expected), Err(got)) => {
                assert_eq!(got.kind(), expected.kind(), "error kind at {:?}: {}", level, got);
                assert_eq!(got.formula(), expected.formula(), "failing formula at {:?}", level);
                assert_eq!(got.to_string(), expected.to_string(), "message at {:?}", level);
            }
            (expected, got) => panic!(
                "outcomes differ at {:?}:\n  interpreter: {:?}\n  compiled:    {:?}",
                level, expected, got
            ),
        }
    }
}

fn assert_equivalent(rules: &Json, inputs: &Json) {
    assert_equivalent_with(&FunctionRegistry::with_builtins(), rules, inputs);
}

fn fixture_dir(group: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("conformance")
        .join("eval")
        .join(group)
}

fn load(dir: &Path, name: &str, suffix: &str) -> Json {
    let path = dir.join(format!("{}.{}.json", name, suffix));
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("Invalid JSON in {}: {}", path.display(), e))
}

// ──────────────────────────────────────────────
// Conformance fixtures
// ──────────────────────────────────────────────

#[test]
fn positive_fixtures_match_the_interpreter() {
    let dir = fixture_dir("positive");
    for name in [
        "invoice_totals",
        "grade_switch",
        "collateral_approval",
        "credit_score_accumulative",
        "weighted_scoring",
        "loan_decision_tree",
        "nested_switch_set_vars",
        "business_functions",
    ] {
        let rules = load(&dir, name, "rules");
        let inputs = load(&dir, name, "inputs");
        assert_equivalent(&rules, &inputs);
    }
}

#[test]
fn runtime_failures_match_the_interpreter() {
    let dir = fixture_dir("negative");
    for name in [
        "missing_declared_input",
        "sqrt_of_negative",
        "switch_without_default",
        "string_arithmetic",
    ] {
        let rules = load(&dir, name, "rules");
        let inputs = load(&dir, name, "inputs");
        assert_equivalent(&rules, &inputs);
    }
}

#[test]
fn cycles_are_rejected_at_compile_time() {
    let dir = fixture_dir("negative");
    let rules = load(&dir, "dependency_cycle", "rules");
    let err = compile(&rules, &FunctionRegistry::with_builtins(), &GenerateOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("cyclic dependency"), "{}", err);
}

// ──────────────────────────────────────────────
// Input sweeps
// ──────────────────────────────────────────────

#[test]
fn grade_switch_across_scores() {
    let rules = json!([{
        "id": "grade",
        "switch": "score",
        "when": [
            { "if": ">= 90", "result": "A", "set_vars": { "$honors": true } },
            { "if": ">= 80", "result": "B" },
            { "if": { "op": "between", "value": [60, 79] }, "result": "C" }
        ]
    }]);
    for score in [95.0, 90.0, 85.5, 79.0, 60.0, 59.9, -1.0] {
        assert_equivalent(&rules, &json!({ "score": score }));
    }
    assert_equivalent(&rules, &json!({ "score": "high" }));
    assert_equivalent(&rules, &json!({}));
}

#[test]
fn scoring_across_profiles() {
    let rules = json!([
        {
            "id": "points",
            "scoring": { "rules": [
                { "var": "income", "ranges": [
                    { "if": ">= 50000", "score": 40, "set_vars": { "$band": "'high'" } },
                    { "if": ">= 20000", "score": 10, "weight": 1.5 }
                ]},
                { "var": "age", "if": { "op": "between", "value": [25, 60] }, "score": 20 }
            ]}
        },
        {
            "id": "risk",
            "scoring": {
                "dimensions": ["points", "region"],
                "tree": [
                    { "if": ">= 50", "children": [
                        { "if": { "op": "in", "value": ["north", "west"] }, "score": 1, "decision": "approve", "level": "low" },
                        { "score": 2, "decision": "review", "set_vars": { "$flag": "$points / 10" } }
                    ]},
                    { "if": ">= 15", "children": [
                        { "if": { "op": "eq", "value": "south" }, "score": 5, "decision": "review" }
                    ]}
                ],
                "default": { "score": 9, "decision": "decline" }
            }
        }
    ]);
    for (income, age, region) in [
        (65000, 40, "west"),
        (65000, 70, "east"),
        (25000, 30, "south"),
        (25000, 30, "north"),
        (1000, 18, "west"),
    ] {
        assert_equivalent(
            &rules,
            &json!({ "income": income, "age": age, "region": region }),
        );
    }
}

#[test]
fn expression_errors_carry_the_same_source_text() {
    let rules = json!([
        { "id": "ratio", "formula": "(a + 1) / (b - b)" },
        { "id": "neg", "formula": "-name" },
        { "id": "bad_call", "formula": "round(a, 1.5)" }
    ]);
    assert_equivalent(&rules, &json!({ "a": 1, "b": 2, "name": "x" }));
    assert_equivalent(&json!([{ "id": "neg", "formula": "-name" }]), &json!({ "name": "x" }));
    assert_equivalent(&json!([{ "id": "c", "formula": "round(a, 1.5)" }]), &json!({ "a": 1 }));
    assert_equivalent(&json!([{ "id": "c", "formula": "max()" }]), &json!({}));
}

#[test]
fn list_bounds_with_variables_compile() {
    let rules = json!([
        { "id": "band", "switch": "score", "when": [
            { "if": { "op": "between", "value": ["$lo", 40] }, "result": "mid" },
            { "if": { "op": "in", "value": ["$lo", 0] }, "result": "floor" }
        ], "default": "out" },
        { "id": "lo", "formula": "base / 2" }
    ]);
    for score in [15, 40, 14, 41, 0] {
        assert_equivalent(&rules, &json!({ "score": score, "base": 30 }));
    }
    assert_equivalent(&rules, &json!({ "score": 0 }));
}

#[test]
fn unbound_intermediates_are_named_as_such() {
    let rules = json!([{ "id": "t", "formula": "$sub + 1" }]);
    assert_equivalent(&rules, &json!({}));

    let compiled = compile(&rules, &FunctionRegistry::with_builtins(), &GenerateOptions::default()).unwrap();
    let err = compiled.run(&json!({})).unwrap_err();
    assert_eq!(err.to_string(), "formula 't': missing intermediate variable 'sub'");
}

#[test]
fn folded_constants_do_not_change_results() {
    let rules = json!([
        { "id": "rate", "formula": "round(0.2 * 100, 0) / 100" },
        { "id": "price", "formula": "base * (1 + $rate) - 2 ** 3" },
        { "id": "fails_late", "formula": "if(flag, 1 / 0, 0)" }
    ]);
    assert_equivalent(&rules, &json!({ "base": 50, "flag": true }));
    assert_equivalent(&rules, &json!({ "base": 50, "flag": false }));
}

#[test]
fn custom_functions_are_called_through_the_registry() {
    let mut registry = FunctionRegistry::with_builtins();
    registry.register(
        FunctionMeta::new("bonus", Category::Custom, "flat bonus by tier").exact(1),
        |args| match args[0].as_str() {
            Some("gold") => Ok(Value::Number(100.0)),
            _ => Ok(Value::Number(0.0)),
        },
    );
    let rules = json!([{ "id": "pay", "formula": "base + bonus(tier)" }]);
    assert_equivalent_with(&registry, &rules, &json!({ "base": 10, "tier": "gold" }));
    assert_equivalent_with(&registry, &rules, &json!({ "base": 10, "tier": "tin" }));

    let compiled = compile(&rules, &registry, &GenerateOptions::default()).unwrap();
    assert_eq!(
        compiled.run(&json!({ "base": 10, "tier": "gold" })).unwrap()["pay"],
        Value::Number(110.0)
    );
}

#[test]
fn compiled_rules_are_reusable() {
    let rules = json!([{ "id": "double", "formula": "x * 2" }]);
    let compiled = compile(&rules, &FunctionRegistry::with_builtins(), &GenerateOptions::default())
        .unwrap();
    for x in 0..10 {
        let out = compiled.run(&json!({ "x": x })).unwrap();
        assert_eq!(out["double"], Value::Number(f64::from(x) * 2.0));
    }
    assert!(compiled.run(&json!([1, 2])).is_err());
}
