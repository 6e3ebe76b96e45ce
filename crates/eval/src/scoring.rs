//! Accumulative and multi-dimensional scoring.

use ruleform_core::{
    AccumulativeScoring, Assignment, MultiDimensionalScoring, ScoreLeaf, ScoreNode,
};

use crate::condition::{eval_condition, Subject};
use crate::context::Context;
use crate::error::ExprError;
use crate::functions::FunctionRegistry;
use crate::ops;
use crate::value::Value;

/// Result of an accumulative scoring run.
#[derive(Debug)]
pub struct Tally<'a> {
    pub total: f64,
    /// `set_vars` of each matched range, in rule order.
    pub set_vars: Vec<&'a [Assignment]>,
}

/// Sum `score * weight` of the first matching range of every rule. A rule
/// with no matching range contributes 0.
pub fn accumulate<'a>(
    scoring: &'a AccumulativeScoring,
    ctx: &Context,
    registry: &FunctionRegistry,
) -> Result<Tally<'a>, ExprError> {
    let mut total = 0.0;
    let mut set_vars = Vec::new();
    for rule in &scoring.rules {
        let subject = match &rule.subject {
            Some(name) => Some(Subject {
                name,
                value: ctx.lookup(name, false)?,
            }),
            None => None,
        };
        for range in &rule.ranges {
            if eval_condition(&range.condition, subject, ctx, registry)? {
                total += range.contribution();
                set_vars.push(range.set_vars.as_slice());
                break;
            }
        }
    }
    match ops::finite(total, "score total") {
        Ok(_) => Ok(Tally { total, set_vars }),
        Err(e) => Err(ExprError::from_op(e, "scoring")),
    }
}

/// Descend the scoring tree one dimension per level, taking the first
/// matching branch. Falls back to the default leaf when a level has no
/// match; without a default that is a `NoMatch` error.
pub fn descend<'a>(
    scoring: &'a MultiDimensionalScoring,
    ctx: &Context,
    registry: &FunctionRegistry,
) -> Result<&'a ScoreLeaf, ExprError> {
    let mut branches = scoring.tree.as_slice();
    for dimension in &scoring.dimensions {
        let value = ctx.lookup(dimension, false)?;
        let subject = Some(Subject {
            name: dimension,
            value,
        });

        let mut chosen = None;
        for branch in branches {
            let hit = match &branch.condition {
                Some(c) => eval_condition(c, subject, ctx, registry)?,
                None => true,
            };
            if hit {
                chosen = Some(&branch.node);
                break;
            }
        }

        match chosen {
            Some(ScoreNode::Leaf(leaf)) => return Ok(leaf),
            Some(ScoreNode::Children(children)) => branches = children.as_slice(),
            None => return fallback(scoring, format!("{} = {}", dimension, value)),
        }
    }
    fallback(scoring, "the tree ends before a leaf".into())
}

fn fallback(scoring: &MultiDimensionalScoring, at: String) -> Result<&ScoreLeaf, ExprError> {
    scoring.default.as_ref().ok_or_else(|| ExprError::NoMatch {
        detail: format!("no scoring branch matched {} and there is no default", at),
    })
}

/// Side values of a reached leaf: `(decision, level)`, null when absent.
pub fn leaf_labels(leaf: &ScoreLeaf) -> (Value, Value) {
    let label = |l: &Option<ruleform_core::Literal>| {
        l.as_ref().map_or(Value::Null, Value::from_literal)
    };
    (label(&leaf.decision), label(&leaf.level))
}
