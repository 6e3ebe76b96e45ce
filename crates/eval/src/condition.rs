//! Condition evaluator and switch selection.
//!
//! `and` / `or` short-circuit left to right: once the outcome is known the
//! remaining children are not evaluated, so their errors never surface.
//! Empty `and` is true, empty `or` is false.

use ruleform_core::{Assignment, ClauseResult, Condition, Operand, Switch};

use crate::context::Context;
use crate::error::ExprError;
use crate::expr::eval_expr;
use crate::functions::FunctionRegistry;
use crate::ops;
use crate::value::Value;

/// The variable a shorthand condition tests: a switch subject, a scoring
/// rule variable or a tree dimension.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub name: &'a str,
    pub value: &'a Value,
}

pub fn eval_condition(
    cond: &Condition,
    subject: Option<Subject<'_>>,
    ctx: &Context,
    registry: &FunctionRegistry,
) -> Result<bool, ExprError> {
    match cond {
        Condition::And(children) => {
            for child in children {
                if !eval_condition(child, subject, ctx, registry)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or(children) => {
            for child in children {
                if eval_condition(child, subject, ctx, registry)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Comparison { op, left, right } => {
            let l = operand_value(left, subject, ctx, registry)?;
            let r = operand_value(right, subject, ctx, registry)?;
            ops::compare(*op, &l, &r).map_err(|e| {
                let text = format!(
                    "{} {} {}",
                    operand_text(left, subject),
                    op.symbol(),
                    operand_text(right, subject)
                );
                ExprError::from_op(e, text)
            })
        }
    }
}

/// Evaluate a condition leaf operand or a `set_vars` value.
pub fn operand_value(
    operand: &Operand,
    subject: Option<Subject<'_>>,
    ctx: &Context,
    registry: &FunctionRegistry,
) -> Result<Value, ExprError> {
    match operand {
        Operand::Literal(lit) => Ok(Value::from_literal(lit)),
        Operand::Expr(e) => eval_expr(e, ctx, registry),
        Operand::List(items) => items
            .iter()
            .map(|i| operand_value(i, subject, ctx, registry))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Operand::Subject => subject
            .map(|s| s.value.clone())
            .ok_or_else(|| ExprError::Type {
                message: "comparison has no subject".into(),
                expr: "<subject>".into(),
            }),
    }
}

fn operand_text(operand: &Operand, subject: Option<Subject<'_>>) -> String {
    match operand {
        Operand::Subject => subject.map_or_else(|| "<subject>".into(), |s| s.name.to_owned()),
        other => other.to_string(),
    }
}

/// Outcome of walking a switch: the result value plus the `set_vars` of
/// every clause on the taken path, outermost first.
#[derive(Debug)]
pub struct Selection<'a> {
    pub value: Value,
    pub set_vars: Vec<&'a [Assignment]>,
}

/// Pick the first matching clause of a switch, descending into nested
/// switches, falling back to the default. Fails with `NoMatch` when nothing
/// matches and there is no default.
pub fn select<'a>(
    switch: &'a Switch,
    ctx: &Context,
    registry: &FunctionRegistry,
) -> Result<Selection<'a>, ExprError> {
    let mut set_vars = Vec::new();
    let value = select_into(switch, ctx, registry, &mut set_vars)?;
    Ok(Selection { value, set_vars })
}

fn select_into<'a>(
    switch: &'a Switch,
    ctx: &Context,
    registry: &FunctionRegistry,
    path: &mut Vec<&'a [Assignment]>,
) -> Result<Value, ExprError> {
    let subject = match &switch.subject {
        Some(name) => Some(Subject {
            name,
            value: ctx.lookup(name, false)?,
        }),
        None => None,
    };

    for clause in &switch.clauses {
        if eval_condition(&clause.condition, subject, ctx, registry)? {
            path.push(&clause.set_vars);
            return clause_value(&clause.result, ctx, registry, path);
        }
    }

    match &switch.default {
        Some(result) => clause_value(result, ctx, registry, path),
        None => Err(ExprError::NoMatch {
            detail: match subject {
                Some(s) => format!("no clause matched {} = {} and there is no default", s.name, s.value),
                None => "no clause matched and there is no default".into(),
            },
        }),
    }
}

fn clause_value<'a>(
    result: &'a ClauseResult,
    ctx: &Context,
    registry: &FunctionRegistry,
    path: &mut Vec<&'a [Assignment]>,
) -> Result<Value, ExprError> {
    match result {
        ClauseResult::Literal(lit) => Ok(Value::from_literal(lit)),
        ClauseResult::Expr(e) => eval_expr(e, ctx, registry),
        ClauseResult::Switch(inner) => select_into(inner, ctx, registry, path),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ruleform_core::{CompareOp, Expr, Literal};

    use super::*;

    fn cmp(op: CompareOp, left: Operand, right: Operand) -> Condition {
        Condition::Comparison { op, left, right }
    }

    fn num(n: f64) -> Operand {
        Operand::Literal(Literal::Number(n))
    }

    fn ctx(vars: &[(&str, Value)]) -> Context {
        Context::new(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn subject_comparisons() {
        let reg = FunctionRegistry::with_builtins();
        let ctx = ctx(&[]);
        let v = Value::Number(85.0);
        let s = Some(Subject { name: "score", value: &v });
        let c = cmp(CompareOp::Gte, Operand::Subject, num(80.0));
        assert_eq!(eval_condition(&c, s, &ctx, &reg), Ok(true));
        let c = cmp(
            CompareOp::Between,
            Operand::Subject,
            Operand::Literal(Literal::List(vec![Literal::Number(90.0), Literal::Number(100.0)])),
        );
        assert_eq!(eval_condition(&c, s, &ctx, &reg), Ok(false));
    }

    #[test]
    fn and_short_circuits_past_errors() {
        let reg = FunctionRegistry::with_builtins();
        let ctx = ctx(&[("a", Value::Number(1.0))]);
        let failing = cmp(CompareOp::Gt, Operand::Expr(Expr::var("$missing")), num(0.0));
        let false_leaf = cmp(CompareOp::Gt, Operand::Expr(Expr::var("a")), num(5.0));
        let true_leaf = cmp(CompareOp::Lt, Operand::Expr(Expr::var("a")), num(5.0));

        let and = Condition::And(vec![false_leaf.clone(), failing.clone()]);
        assert_eq!(eval_condition(&and, None, &ctx, &reg), Ok(false));
        let or = Condition::Or(vec![true_leaf, failing.clone()]);
        assert_eq!(eval_condition(&or, None, &ctx, &reg), Ok(true));
        let or = Condition::Or(vec![false_leaf, failing]);
        assert!(eval_condition(&or, None, &ctx, &reg).is_err());

        assert_eq!(eval_condition(&Condition::And(vec![]), None, &ctx, &reg), Ok(true));
        assert_eq!(eval_condition(&Condition::Or(vec![]), None, &ctx, &reg), Ok(false));
    }

    #[test]
    fn type_errors_render_the_comparison() {
        let reg = FunctionRegistry::with_builtins();
        let ctx = ctx(&[]);
        let v = Value::from("gold");
        let s = Some(Subject { name: "tier", value: &v });
        let c = cmp(CompareOp::Gt, Operand::Subject, num(3.0));
        match eval_condition(&c, s, &ctx, &reg) {
            Err(ExprError::Type { expr, .. }) => assert_eq!(expr, "tier > 3"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn switch_without_match_or_default_fails() {
        let reg = FunctionRegistry::with_builtins();
        let ctx = ctx(&[("score", Value::Number(10.0))]);
        let switch = Switch {
            subject: Some("score".into()),
            clauses: vec![ruleform_core::WhenClause {
                condition: cmp(CompareOp::Gte, Operand::Subject, num(50.0)),
                result: ClauseResult::Literal(Literal::Str("pass".into())),
                set_vars: vec![],
            }],
            default: None,
        };
        match select(&switch, &ctx, &reg) {
            Err(ExprError::NoMatch { detail }) => assert!(detail.contains("score = 10")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
