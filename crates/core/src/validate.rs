//! Document validation.
//!
//! Collects every structural problem of every formula plus dependency
//! cycles, and non-fatal warnings. A document with no errors also yields
//! its [`ExecutionPlan`], so callers validate and resolve in one pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::document::{parse_lenient, ClauseResult, Document, Formula, FormulaKind, Switch};
use crate::error::ConfigError;
use crate::graph::{resolve, ExecutionPlan, FormulaGraph};

/// Outcome of validating a rule document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Full validation result: the report, the typed errors behind it, and
/// the execution plan when the document is valid.
#[derive(Debug, Clone)]
pub struct Checked {
    pub report: ValidationReport,
    pub issues: Vec<ConfigError>,
    pub plan: Option<ExecutionPlan>,
}

impl Checked {
    /// The plan, or the aggregated errors when the document is invalid.
    pub fn into_plan(self) -> Result<ExecutionPlan, ConfigError> {
        match (self.plan, ConfigError::aggregate(self.issues)) {
            (_, Some(e)) => Err(e),
            (Some(plan), None) => Ok(plan),
            (None, None) => Err(ConfigError::NotADocument),
        }
    }
}

/// Validate a document and report errors and warnings.
pub fn validate(config: &Json) -> ValidationReport {
    check(config).report
}

/// Validate a document, keeping typed errors and the resolved plan.
pub fn check(config: &Json) -> Checked {
    let parsed = match parse_lenient(config) {
        Ok(p) => p,
        Err(e) => return finish(vec![e], Vec::new(), None),
    };

    let warnings = collect_warnings(&parsed.formulas);
    let mut issues = parsed.errors;

    if !issues.is_empty() {
        // Still report cycles among the formulas that did parse.
        if let Err(e) = FormulaGraph::build(&parsed.formulas).topological_order() {
            issues.push(e);
        }
        return finish(issues, warnings, None);
    }

    let doc = Document {
        id: parsed.id,
        formulas: parsed.formulas,
    };
    match resolve(doc) {
        Ok(plan) => finish(issues, warnings, Some(plan)),
        Err(e) => {
            issues.push(e);
            finish(issues, warnings, None)
        }
    }
}

fn finish(issues: Vec<ConfigError>, warnings: Vec<String>, plan: Option<ExecutionPlan>) -> Checked {
    for w in &warnings {
        tracing::warn!(warning = %w, "rule document warning");
    }
    Checked {
        report: ValidationReport {
            valid: issues.is_empty(),
            errors: issues.iter().map(ToString::to_string).collect(),
            warnings,
        },
        issues,
        plan,
    }
}

fn collect_warnings(formulas: &[Formula]) -> Vec<String> {
    let mut warnings = Vec::new();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for f in formulas {
        *counts.entry(f.id.as_str()).or_default() += 1;
    }
    for (id, n) in counts.iter().filter(|(_, n)| **n > 1) {
        warnings.push(format!(
            "formula id '{}' is declared {} times; the last declaration wins",
            id, n
        ));
    }

    let graph = FormulaGraph::build(formulas);
    for f in formulas {
        let body = f.body_variables();
        for input in f.inputs.iter().filter(|i| !body.contains(i)) {
            warnings.push(format!(
                "formula '{}' declares unused input '{}'",
                f.id, input
            ));
        }

        let mut intermediates = Vec::new();
        f.visit_exprs(&mut |e| {
            for r in e.intermediate_refs() {
                if !intermediates.contains(&r) {
                    intermediates.push(r);
                }
            }
        });
        for r in intermediates.iter().filter(|r| !graph.is_produced(r)) {
            warnings.push(format!(
                "formula '{}' references intermediate variable '${}' that no formula produces; it must be supplied as an input",
                f.id, r
            ));
        }

        match &f.kind {
            FormulaKind::Switch(s) if !switch_has_defaults(s) => warnings.push(format!(
                "switch '{}' has no default; inputs matching no clause fail the evaluation",
                f.id
            )),
            FormulaKind::MultiDimensional(m) if m.default.is_none() => warnings.push(format!(
                "scoring tree '{}' has no default; inputs reaching a level with no matching branch fail the evaluation",
                f.id
            )),
            _ => {}
        }
    }
    warnings
}

/// Whether this switch and every nested switch carry a default.
fn switch_has_defaults(s: &Switch) -> bool {
    let nested_ok = s
        .clauses
        .iter()
        .map(|c| &c.result)
        .chain(s.default.as_ref())
        .all(|r| match r {
            ClauseResult::Switch(inner) => switch_has_defaults(inner),
            _ => true,
        });
    s.default.is_some() && nested_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_document_yields_plan() {
        let checked = check(&json!({
            "id": "pricing",
            "formulas": [
                { "id": "total", "formula": "price * quantity * (1 + tax_rate)", "inputs": ["price", "quantity", "tax_rate"] }
            ]
        }));
        assert!(checked.report.valid);
        assert!(checked.report.errors.is_empty());
        assert!(checked.report.warnings.is_empty());
        let plan = checked.into_plan().unwrap();
        assert_eq!(plan.document_id.as_deref(), Some("pricing"));
        assert_eq!(plan.order(), vec!["total"]);
    }

    #[test]
    fn reports_every_error_not_just_the_first() {
        let report = validate(&json!([
            { "id": "a", "formula": "1 +" },
            { "id": "b" },
            { "formula": "2" },
            { "id": "c", "formula": "1" }
        ]));
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].contains("formula 'a'"));
        assert!(report.errors[1].contains("declares no kind"));
        assert!(report.errors[2].contains("formula #2"));
    }

    #[test]
    fn several_errors_aggregate_into_invalid() {
        let err = check(&json!([
            { "id": "a", "formula": "(" },
            { "id": "b", "formula": ")" }
        ]))
        .into_plan()
        .unwrap_err();
        match err {
            ConfigError::Invalid { errors } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cycle_surfaces_as_itself() {
        let err = check(&json!([
            { "id": "a", "formula": "$b" },
            { "id": "b", "formula": "$a" }
        ]))
        .into_plan()
        .unwrap_err();
        assert!(matches!(err, ConfigError::CyclicDependency { .. }));
    }

    #[test]
    fn cycles_are_reported_alongside_parse_errors() {
        let report = validate(&json!([
            { "id": "a", "formula": "$b" },
            { "id": "b", "formula": "$a" },
            { "id": "c", "formula": "*" }
        ]));
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[1].starts_with("cyclic dependency"));
    }

    #[test]
    fn warns_without_blocking() {
        let checked = check(&json!([
            { "id": "x", "formula": "a + 1", "inputs": ["a", "b"] },
            { "id": "x", "formula": "$ghost * 2" },
            { "id": "grade", "switch": "x", "when": [{ "if": ">= 1", "result": "ok" }] }
        ]));
        assert!(checked.report.valid);
        let w = &checked.report.warnings;
        assert_eq!(w.len(), 4, "{:?}", w);
        assert!(w[0].contains("'x' is declared 2 times"));
        assert!(w[1].contains("unused input 'b'"));
        assert!(w[2].contains("'$ghost'"));
        assert!(w[3].contains("switch 'grade' has no default"));
        assert!(checked.plan.is_some());
    }

    #[test]
    fn nested_switch_without_default_is_flagged() {
        let report = validate(&json!([
            { "id": "t", "switch": "a", "when": [
                { "if": "> 0", "result": { "switch": "b", "when": [{ "if": "> 0", "result": 1 }] } }
            ], "default": 0 }
        ]));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn report_serializes_with_stable_field_names() {
        let report = validate(&json!({ "nope": true }));
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["valid"], json!(false));
        assert_eq!(v["errors"].as_array().unwrap().len(), 1);
        assert_eq!(v["warnings"], json!([]));
    }
}
