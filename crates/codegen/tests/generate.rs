//! Rust source generation: structure of the emitted module, metadata,
//! options and unsupported constructs.

use ruleform_codegen::{generate, CodegenError, GenerateOptions, OptimizationLevel};
use serde_json::json;

fn invoice() -> serde_json::Value {
    json!({
        "id": "invoice",
        "formulas": [
            { "id": "total", "formula": "round($subtotal * (1 + tax_rate), 2)" },
            { "id": "subtotal", "formula": "price * quantity", "as": "net" },
            { "id": "band", "switch": "price", "when": [
                { "if": ">= 100", "result": "premium", "set_vars": { "$badge": true } }
            ], "default": "standard" }
        ]
    })
}

#[test]
fn emits_a_self_contained_module() {
    let out = generate(&invoice(), &GenerateOptions::default()).unwrap();
    let code = &out.code;
    assert!(code.starts_with("// Auto-generated by ruleform. Do not edit.\n"));
    assert!(code.contains("// Document: invoice"));
    assert!(code.contains("pub enum Value {"));
    assert!(code.contains("pub enum RuleError {"));
    assert!(code.contains(
        "pub fn evaluate_rules(inputs: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, RuleError> {"
    ));
    assert!(!code.contains("extern crate"));
    assert!(code.contains("unused_assignments"));
    assert!(!code.contains("ruleform_eval"));

    // Only helpers for functions the document calls.
    assert!(code.contains("fn fn_round(a: &[Value])"));
    assert!(!code.contains("fn fn_sqrt("));

    // Dependency order: subtotal runs before total.
    let subtotal = code.find("const F: &str = \"subtotal\";").unwrap();
    let total = code.find("const F: &str = \"total\";").unwrap();
    assert!(subtotal < total);

    // Alias and set_vars are bound into the outputs.
    assert!(code.contains("out.insert(\"net\".to_string(), value.clone());"));
    assert!(code.contains("out.insert(\"badge\".to_string(), assigned.clone());"));
}

#[test]
fn switches_become_if_else_chains_with_a_default() {
    let code = generate(&invoice(), &GenerateOptions::default()).unwrap().code;
    assert!(code.contains("let subject = get(F, &v_price, \"price\")?;"));
    assert!(code.contains("get_ref(F, &v_subtotal, \"subtotal\")?"));
    assert!(code.contains("if compare(F, \"price >= 100\", Cmp::Gte, &get(F, &v_price, \"price\")?, &Value::Number(100.0_f64))? {"));
    assert!(code.contains("Value::Str(\"standard\".to_string())"));
    assert!(code.contains("for arm in path {"));
}

#[test]
fn switches_without_default_report_no_match() {
    let rules = json!([{ "id": "grade", "switch": "score", "when": [{ "if": ">= 50", "result": "pass" }] }]);
    let code = generate(&rules, &GenerateOptions::default()).unwrap().code;
    assert!(code.contains("no clause matched {} = {} and there is no default"));
}

#[test]
fn scoring_is_unrolled() {
    let rules = json!([
        { "id": "points", "scoring": { "rules": [
            { "var": "income", "ranges": [{ "if": ">= 50000", "score": 40 }, { "if": ">= 20000", "score": 10, "weight": 0.5 }] }
        ]}},
        { "id": "risk", "scoring": {
            "dimensions": ["points"],
            "tree": [{ "if": ">= 40", "score": 1, "decision": "approve" }],
            "default": { "score": 0, "decision": "decline" }
        }}
    ]);
    let code = generate(&rules, &GenerateOptions::default()).unwrap().code;
    assert!(code.contains("total += 40.0_f64;"));
    assert!(code.contains("total += 5.0_f64;"));
    assert!(code.contains("result of 'score total' is not a finite number"));
    assert!(code.contains("let reached: Result<u32, String> = 'tree: {"));
    assert!(code.contains("out.insert(\"risk_decision\".to_string(), decision.clone());"));
    assert!(!code.contains("risk_level"));
}

#[test]
fn metadata_describes_the_module() {
    let opts = GenerateOptions {
        function_name: "price_rules".into(),
        ..GenerateOptions::default()
    };
    let meta = generate(&invoice(), &opts).unwrap().metadata;
    assert_eq!(meta.function_name, "price_rules");
    assert_eq!(meta.document_id.as_deref(), Some("invoice"));
    assert_eq!(meta.formula_count, 3);
    assert_eq!(meta.order, vec!["subtotal", "total", "band"]);
    assert_eq!(meta.external_inputs, vec!["price", "quantity", "tax_rate"]);
    assert_eq!(meta.outputs, vec!["badge", "band", "net", "subtotal", "total"]);
    assert_eq!(meta.functions, vec!["round"]);
    assert_eq!(meta.optimization_level, OptimizationLevel::Basic);

    let json = serde_json::to_value(&meta).unwrap();
    assert_eq!(json["optimization_level"], json!("basic"));
}

#[test]
fn comments_name_each_formula() {
    let opts = GenerateOptions {
        include_comments: true,
        ..GenerateOptions::default()
    };
    let code = generate(&invoice(), &opts).unwrap().code;
    assert!(code.contains("    // subtotal (expression)\n"));
    assert!(code.contains("    // band (switch)\n"));
    assert!(code.contains("/// Inputs: price, quantity, tax_rate."));

    let plain = generate(&invoice(), &GenerateOptions::default()).unwrap().code;
    assert!(!plain.contains("// subtotal (expression)"));
}

#[test]
fn aggressive_folds_constants_and_drops_dead_slots() {
    let rules = json!([
        { "id": "rate", "formula": "x * (1 + 0.5 * 2)" },
        { "id": "unused", "formula": "sqrt(16) + y" }
    ]);
    let basic = generate(&rules, &GenerateOptions::default()).unwrap().code;
    assert!(basic.contains("let mut v_unused: Option<Value>"));
    assert!(basic.contains("\"0.5 * 2\""));

    let opts = GenerateOptions {
        optimization_level: OptimizationLevel::Aggressive,
        ..GenerateOptions::default()
    };
    let aggressive = generate(&rules, &opts).unwrap().code;
    assert!(aggressive.contains("// Formulas: 2 (aggressive optimization)"));
    assert!(!aggressive.contains("let mut v_unused"));
    assert!(!aggressive.contains("\"0.5 * 2\""));
    assert!(aggressive.contains("Value::Number(2.0_f64)"));
    // sqrt(16) folded away, so its helper is not emitted.
    assert!(!aggressive.contains("fn fn_sqrt("));
    assert!(aggressive.contains("out.insert(\"unused\".to_string(), value.clone());"));
}

#[test]
fn clock_and_unknown_functions_are_unsupported() {
    let rules = json!([
        { "id": "ok", "formula": "1 + 1" },
        { "id": "stamp", "formula": "today()" }
    ]);
    match generate(&rules, &GenerateOptions::default()).unwrap_err() {
        CodegenError::UnsupportedConstruct { formula, construct } => {
            assert_eq!(formula, "stamp");
            assert_eq!(construct, "function 'today()'");
        }
        other => panic!("unexpected {:?}", other),
    }

    let rules = json!([{ "id": "x", "formula": "loyalty_bonus(tier)" }]);
    let err = generate(&rules, &GenerateOptions::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "formula 'x': cannot generate code for function 'loyalty_bonus()'"
    );
}

#[test]
fn invalid_documents_and_names_are_rejected() {
    let err = generate(&json!([{ "id": "a", "formula": "1 +" }]), &GenerateOptions::default())
        .unwrap_err();
    assert!(matches!(err, CodegenError::Config(_)));

    let opts = GenerateOptions {
        function_name: "not valid".into(),
        ..GenerateOptions::default()
    };
    let err = generate(&invoice(), &opts).unwrap_err();
    assert!(matches!(err, CodegenError::InvalidFunctionName(name) if name == "not valid"));
}

#[test]
fn writes_the_module_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.rs");
    let out = generate(&invoice(), &GenerateOptions::default()).unwrap();
    out.write(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), out.code);

    let missing = dir.path().join("no-such-dir").join("rules.rs");
    assert!(matches!(out.write(&missing), Err(CodegenError::Io { .. })));
}
