//! Generated modules must behave like the interpreter once compiled.
//!
//! Every case is generated at both optimization levels, wrapped in its own
//! module of one scratch binary, compiled with `rustc` and run. Each module
//! prints its result map (or error message) in `Debug` form, which the test
//! compares line by line with `ruleform_eval::evaluate` on the same inputs.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use ruleform_codegen::{generate, GenerateOptions, OptimizationLevel};
use serde_json::{json, Value as Json};

const LEVELS: [OptimizationLevel; 2] = [OptimizationLevel::Basic, OptimizationLevel::Aggressive];

const RUN_CASE_HEAD: &str = "pub fn run_case() -> String {
    #[allow(unused_mut)]
    let mut inputs: BTreeMap<String, Value> = BTreeMap::new();
";

const RUN_CASE_TAIL: &str = r#"    match evaluate_rules(&inputs) {
        Ok(out) => out
            .iter()
            .map(|(k, v)| format!("{}={:?}", k, v))
            .collect::<Vec<_>>()
            .join(";"),
        Err(e) => format!("error: {}", e),
    }
}
"#;

struct Case {
    name: String,
    rules: Json,
    inputs: Json,
}

fn case(name: &str, rules: Json, inputs: Json) -> Case {
    Case {
        name: name.to_owned(),
        rules,
        inputs,
    }
}

fn fixture_dir(group: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
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

fn fixture_cases() -> Vec<Case> {
    let mut cases = Vec::new();
    for (group, names) in [
        (
            "positive",
            &[
                "invoice_totals",
                "grade_switch",
                "collateral_approval",
                "credit_score_accumulative",
                "weighted_scoring",
                "loan_decision_tree",
                "nested_switch_set_vars",
                "business_functions",
            ][..],
        ),
        (
            "negative",
            &[
                "missing_declared_input",
                "sqrt_of_negative",
                "switch_without_default",
                "string_arithmetic",
            ][..],
        ),
    ] {
        let dir = fixture_dir(group);
        for name in names {
            cases.push(case(name, load(&dir, name, "rules"), load(&dir, name, "inputs")));
        }
    }
    cases
}

fn builtin_cases() -> Vec<Case> {
    let inputs = json!({
        "x": 2.5,
        "y": 4,
        "s": "Ab",
        "n": null,
        "flag": true,
        "num_s": "3.5",
        "items": [3, 1, 2]
    });
    let formulas = [
        ("abs", "abs(-x)"),
        ("sqrt", "sqrt(y)"),
        ("pow", "pow(x, y)"),
        ("exp", "exp(x)"),
        ("log", "log(y)"),
        ("log10", "log10(y * 25)"),
        ("round0", "round(x)"),
        ("round2", "round(x * 1.2345, 2)"),
        ("floor", "floor(x)"),
        ("ceil", "ceil(x)"),
        ("trunc", "trunc(-x)"),
        ("sign", "sign(-x)"),
        ("clamp", "clamp(x, 0, 2)"),
        ("min", "min(items, x)"),
        ("max", "max(items, y)"),
        ("sum", "sum(items)"),
        ("avg", "avg(items)"),
        ("mean", "mean(x, y)"),
        ("median", "median(items)"),
        ("variance", "variance(items)"),
        ("stddev", "stddev(items)"),
        ("count", "count(items)"),
        ("percentage", "percentage(x, y)"),
        ("percent_of", "percent_of(y, 200)"),
        ("discount", "discount(y * 25, x)"),
        ("markup", "markup(y, 10)"),
        ("tax", "tax(y * 25, 0.2)"),
        ("margin", "margin(y * 25, 60)"),
        ("simple_interest", "simple_interest(1000, 0.05, y)"),
        ("compound_interest", "compound_interest(1000, 0.05, y)"),
        ("pmt", "pmt(0.01, 12, 1000)"),
        ("if", "if(flag, s, n)"),
        ("coalesce", "coalesce(n, s)"),
        ("concat", "concat(s, '-', y)"),
        ("len", "len(s)"),
        ("lower", "lower(s)"),
        ("upper", "upper(s)"),
        ("to_number", "to_number(num_s)"),
        ("to_string", "to_string(y)"),
        ("is_null", "is_null(n)"),
    ];
    let rules: Vec<Json> = formulas
        .iter()
        .map(|(id, f)| json!({ "id": id, "formula": f }))
        .collect();
    vec![case("all_builtins", Json::Array(rules), inputs)]
}

fn failure_cases() -> Vec<Case> {
    let inputs = json!({ "neg": -4, "zero": 0, "s": "abc", "empty": [] });
    let mut cases: Vec<Case> = [
        "sqrt(neg)",
        "log(zero)",
        "round(neg, 1.5)",
        "avg(empty)",
        "min(s, 1)",
        "clamp(neg, 5, 1)",
        "len(neg)",
        "percentage(neg, zero)",
        "to_number(s)",
        "pow(zero, neg)",
        "max()",
        "neg / zero",
        "neg % zero",
        "s * 2",
        "-s",
        "neg * 1e308 * 10",
    ]
    .iter()
    .enumerate()
    .map(|(i, f)| {
        case(
            &format!("failure_{}", i),
            json!([{ "id": "f", "formula": f }]),
            inputs.clone(),
        )
    })
    .collect();

    cases.push(case(
        "missing_intermediate",
        json!([{ "id": "t", "formula": "$sub + 1" }]),
        json!({}),
    ));
    cases
}

fn semantic_cases() -> Vec<Case> {
    let mut cases = vec![
        case(
            "duplicate_ids",
            json!([{ "id": "x", "formula": "1" }, { "id": "x", "formula": "2" }]),
            json!({}),
        ),
        case(
            "operators",
            json!([
                { "id": "m", "formula": "-7 % 3" },
                { "id": "p", "formula": "2 ** 3 ** 2" },
                { "id": "u", "formula": "-2 ** 2" },
                { "id": "c", "formula": "a >= 3" }
            ]),
            json!({ "a": 3 }),
        ),
        case(
            "set_vars_chain",
            json!([{
                "id": "tier",
                "switch": "spend",
                "when": [{
                    "if": ">= 100",
                    "result": "gold",
                    "set_vars": { "$base": "spend / 10", "$bonus": "$base * 2" }
                }],
                "default": "none"
            }]),
            json!({ "spend": 250 }),
        ),
    ];

    let scoring = json!([
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
                        { "score": 2, "decision": "review" }
                    ]},
                    { "if": ">= 15", "children": [
                        { "if": { "op": "eq", "value": "south" }, "score": 5, "decision": "review" }
                    ]}
                ],
                "default": { "score": 9, "decision": "decline" }
            }
        }
    ]);
    let bands = json!([
        { "id": "band", "switch": "score", "when": [
            { "if": { "op": "between", "value": ["$lo", 40] }, "result": "mid" },
            { "if": { "op": "in", "value": ["$lo", 0] }, "result": "floor" }
        ], "default": "out" },
        { "id": "lo", "formula": "base / 2" }
    ]);
    for score in [15, 41, 0] {
        cases.push(case(
            &format!("list_bounds_{}", score),
            bands.clone(),
            json!({ "score": score, "base": 30 }),
        ));
    }

    for (i, (income, age, region)) in [(65000, 40, "west"), (25000, 30, "north"), (1000, 18, "west")]
        .into_iter()
        .enumerate()
    {
        cases.push(case(
            &format!("scoring_{}", i),
            scoring.clone(),
            json!({ "income": income, "age": age, "region": region }),
        ));
    }
    cases
}

/// A JSON input as a Rust expression of the generated `Value` type.
fn rust_value(v: &Json) -> String {
    match v {
        Json::Null => "Value::Null".into(),
        Json::Bool(b) => format!("Value::Bool({})", b),
        Json::Number(n) => format!("Value::Number({:?}_f64)", n.as_f64().expect("finite number")),
        Json::String(s) => format!("Value::Str({:?}.to_string())", s),
        Json::Array(items) => format!(
            "Value::List(vec![{}])",
            items.iter().map(rust_value).collect::<Vec<_>>().join(", ")
        ),
        Json::Object(_) => panic!("object inputs are not supported"),
    }
}

fn run_case_fn(inputs: &Json) -> String {
    let mut src = String::from(RUN_CASE_HEAD);
    for (k, v) in inputs.as_object().expect("inputs object") {
        writeln!(src, "    inputs.insert({:?}.to_string(), {});", k, rust_value(v)).unwrap();
    }
    src.push_str(RUN_CASE_TAIL);
    src
}

fn interpreted(c: &Case) -> String {
    match ruleform_eval::evaluate(&c.rules, &c.inputs) {
        Ok(ev) => ev
            .results
            .iter()
            .map(|(k, v)| format!("{}={:?}", k, v))
            .collect::<Vec<_>>()
            .join(";"),
        Err(e) => format!("error: {}", e),
    }
}

fn rustc() -> std::ffi::OsString {
    std::env::var_os("RUSTC").unwrap_or_else(|| "rustc".into())
}

#[test]
fn compiled_modules_match_the_interpreter() {
    let cases: Vec<Case> = fixture_cases()
        .into_iter()
        .chain(builtin_cases())
        .chain(failure_cases())
        .chain(semantic_cases())
        .collect();

    let mut src = String::new();
    let mut expected: Vec<(String, String, String)> = Vec::new();
    for (i, c) in cases.iter().enumerate() {
        let want = interpreted(c);
        for level in LEVELS {
            let opts = GenerateOptions {
                optimization_level: level,
                ..GenerateOptions::default()
            };
            let code = generate(&c.rules, &opts)
                .unwrap_or_else(|e| panic!("generate failed for {} at {:?}: {}", c.name, level, e))
                .code;
            let module = format!("case_{}_{}", i, level.name());
            writeln!(src, "mod {} {{\n{}\n{}}}\n", module, code, run_case_fn(&c.inputs)).unwrap();
            expected.push((module, format!("{} ({})", c.name, level.name()), want.clone()));
        }
    }
    src.push_str("fn main() {\n");
    for (module, _, _) in &expected {
        writeln!(src, "    println!(\"{}\\t{{}}\", {}::run_case());", module, module).unwrap();
    }
    src.push_str("}\n");

    let dir = tempfile::tempdir().unwrap();
    let main_rs = dir.path().join("generated_rules.rs");
    let binary = dir.path().join("generated_rules");
    std::fs::write(&main_rs, &src).unwrap();

    let build = Command::new(rustc())
        .args(["--edition", "2021", "--crate-type", "bin", "-o"])
        .arg(&binary)
        .arg(&main_rs)
        .output()
        .expect("rustc runs");
    let diagnostics = String::from_utf8_lossy(&build.stderr);
    assert!(build.status.success(), "generated code failed to compile:\n{}", diagnostics);
    assert!(
        !diagnostics.contains("never read"),
        "generated code warns about dead assignments:\n{}",
        diagnostics
    );

    let run = Command::new(&binary).output().expect("generated binary runs");
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
    let stdout = String::from_utf8(run.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), expected.len());

    for (line, (module, label, want)) in lines.iter().zip(&expected) {
        let (printed_module, got) = line.split_once('\t').expect("tab-separated line");
        assert_eq!(printed_module, module);
        assert_eq!(got, want, "generated module disagrees with the interpreter for {}", label);
    }
}

#[test]
fn missing_intermediate_is_reported_as_such() {
    let c = &failure_cases()
        .into_iter()
        .find(|c| c.name == "missing_intermediate")
        .unwrap();
    assert_eq!(
        interpreted(c),
        "error: formula 't': missing intermediate variable 'sub'"
    );
}
