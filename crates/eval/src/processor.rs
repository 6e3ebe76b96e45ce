//! Formula processor: runs an execution plan against one set of inputs.

use std::collections::BTreeMap;

use ruleform_core::{Assignment, ExecutionPlan, Formula, FormulaKind};

use crate::condition::{operand_value, select};
use crate::context::Context;
use crate::error::{EvalError, ExprError};
use crate::expr::eval_expr;
use crate::functions::FunctionRegistry;
use crate::scoring::{accumulate, descend, leaf_labels};
use crate::value::Value;

/// Execute every formula of `plan` in order. Returns the values bound by
/// the formulas (ids, aliases, side outputs and `set_vars`); the first
/// failure aborts the run and no partial results are returned.
pub fn execute(
    plan: &ExecutionPlan,
    inputs: BTreeMap<String, Value>,
    registry: &FunctionRegistry,
) -> Result<BTreeMap<String, Value>, EvalError> {
    let mut ctx = Context::new(inputs);
    for formula in &plan.formulas {
        tracing::debug!(formula = %formula.id, kind = formula.kind_name(), "executing formula");
        run_formula(formula, &mut ctx, registry).map_err(|e| e.in_formula(&formula.id))?;
    }
    Ok(ctx.into_outputs())
}

fn run_formula(
    formula: &Formula,
    ctx: &mut Context,
    registry: &FunctionRegistry,
) -> Result<(), ExprError> {
    for name in formula.declared_reads() {
        ctx.lookup(&name, false)?;
    }

    match &formula.kind {
        FormulaKind::Expression(e) => {
            let value = eval_expr(&e.expr, ctx, registry)?;
            bind_primary(formula, ctx, value);
        }
        FormulaKind::Switch(switch) => {
            let selection = select(switch, ctx, registry)?;
            bind_primary(formula, ctx, selection.value);
            apply_set_vars(&selection.set_vars, ctx, registry)?;
        }
        FormulaKind::Accumulative(scoring) => {
            let tally = accumulate(scoring, ctx, registry)?;
            bind_primary(formula, ctx, Value::Number(tally.total));
            apply_set_vars(&tally.set_vars, ctx, registry)?;
        }
        FormulaKind::MultiDimensional(scoring) => {
            let leaf = descend(scoring, ctx, registry)?;
            bind_primary(formula, ctx, Value::from_literal(&leaf.primary()));
            let (decision, level) = leaf_labels(leaf);
            if scoring.has_decision() {
                ctx.bind(&formula.decision_output(), decision);
            }
            if scoring.has_level() {
                ctx.bind(&formula.level_output(), level);
            }
            apply_set_vars(&[leaf.set_vars.as_slice()], ctx, registry)?;
        }
    }
    Ok(())
}

fn bind_primary(formula: &Formula, ctx: &mut Context, value: Value) {
    for target in formula.primary_targets() {
        ctx.bind(&target, value.clone());
    }
}

/// Apply `set_vars` groups in path order; later assignments see earlier ones.
fn apply_set_vars(
    groups: &[&[Assignment]],
    ctx: &mut Context,
    registry: &FunctionRegistry,
) -> Result<(), ExprError> {
    for group in groups {
        for assignment in group.iter() {
            let value = operand_value(&assignment.value, None, ctx, registry)?;
            ctx.bind(&assignment.name, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ruleform_core::check;
    use serde_json::json;

    use super::*;
    use crate::context::parse_inputs;

    fn run(rules: serde_json::Value, inputs: serde_json::Value) -> Result<BTreeMap<String, Value>, EvalError> {
        let plan = check(&rules).into_plan()?;
        execute(&plan, parse_inputs(&inputs)?, &FunctionRegistry::with_builtins())
    }

    #[test]
    fn switch_set_vars_run_after_the_primary_value() {
        let out = run(
            json!([{
                "id": "tier",
                "switch": "spend",
                "when": [
                    { "if": ">= 1000", "result": "gold", "set_vars": { "$bonus": "$tier_rate * spend", "$tier_rate": 0.1 } },
                    { "if": ">= 100", "result": "silver" }
                ],
                "default": "bronze"
            }]),
            json!({ "spend": 2000, "tier_rate": 0.05 }),
        )
        .unwrap();
        assert_eq!(out["tier"], Value::from("gold"));
        assert_eq!(out["bonus"], Value::Number(100.0));
        assert_eq!(out["tier_rate"], Value::Number(0.1));
    }

    #[test]
    fn declared_inputs_are_checked_before_the_body() {
        let err = run(
            json!([{ "id": "a", "formula": "1", "inputs": ["b"] }]),
            json!({}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EvalError::MissingInput {
                formula: "a".into(),
                name: "b".into(),
                intermediate: false
            }
        );
    }

    #[test]
    fn multidimensional_outputs_side_labels() {
        let out = run(
            json!([{
                "id": "risk",
                "scoring": {
                    "dimensions": ["credit"],
                    "tree": [
                        { "if": ">= 700", "score": 10, "decision": "approve", "level": "low" },
                        { "if": ">= 600", "score": 40, "decision": "review" }
                    ]
                }
            }]),
            json!({ "credit": 650 }),
        )
        .unwrap();
        assert_eq!(out["risk"], Value::Number(40.0));
        assert_eq!(out["risk_decision"], Value::from("review"));
        assert_eq!(out["risk_level"], Value::Null);
    }
}
