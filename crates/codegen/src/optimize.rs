//! Optimization passes over the lowered program.

use std::collections::BTreeSet;

use ruleform_eval::{ops, Category, FunctionRegistry};
use serde::{Deserialize, Serialize};

use crate::ir::{Assign, Body, Chain, Node, Outcome, Program, Test, TreeBranch, TreeNode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    /// Straight translation: every variable gets a local slot.
    #[default]
    Basic,
    /// Constant folding, and slots only for variables something reads.
    Aggressive,
}

impl OptimizationLevel {
    pub fn name(self) -> &'static str {
        match self {
            OptimizationLevel::Basic => "basic",
            OptimizationLevel::Aggressive => "aggressive",
        }
    }
}

impl std::str::FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(OptimizationLevel::Basic),
            "aggressive" => Ok(OptimizationLevel::Aggressive),
            other => Err(format!(
                "unknown optimization level '{}' (expected basic or aggressive)",
                other
            )),
        }
    }
}

/// Run the passes enabled by `level`.
pub fn optimize(program: &mut Program, registry: &FunctionRegistry, level: OptimizationLevel) {
    if level == OptimizationLevel::Aggressive {
        let folded = fold_constants(program, registry);
        tracing::debug!(folded, "constant folding done");
    }
}

/// Replace operator and call nodes whose operands are all constants with
/// their value. Only pure non-custom functions are folded, and a node
/// whose evaluation fails is left alone so the error still surfaces at
/// run time. Returns the number of folded nodes.
pub fn fold_constants(program: &mut Program, registry: &FunctionRegistry) -> usize {
    let mut folded = 0;
    for unit in &mut program.units {
        visit_body_mut(&mut unit.body, &mut |node| folded += fold_node(node, registry));
    }
    folded
}

fn fold_node(node: &mut Node, registry: &FunctionRegistry) -> usize {
    let mut folded = match node {
        Node::Neg { operand, .. } => fold_node(operand, registry),
        Node::Binary { lhs, rhs, .. } => fold_node(lhs, registry) + fold_node(rhs, registry),
        Node::Call { args, .. } | Node::List(args) => {
            args.iter_mut().map(|a| fold_node(a, registry)).sum()
        }
        Node::Const(_) | Node::Var { .. } => return 0,
    };
    if let Some(value) = constant_value(node, registry) {
        *node = Node::Const(value);
        folded += 1;
    }
    folded
}

fn constant_value(node: &Node, registry: &FunctionRegistry) -> Option<ruleform_eval::Value> {
    let konst = |n: &Node| match n {
        Node::Const(v) => Some(v.clone()),
        _ => None,
    };
    match node {
        Node::Neg { operand, .. } => ops::negate(&konst(operand)?).ok(),
        Node::Binary { op, lhs, rhs, .. } => ops::binary(*op, &konst(lhs)?, &konst(rhs)?).ok(),
        Node::Call { name, args, .. } => {
            let meta = registry.get(name)?;
            if !meta.pure || meta.category == Category::Custom {
                return None;
            }
            let values = args.iter().map(konst).collect::<Option<Vec<_>>>()?;
            registry.call(name, &values).ok()
        }
        Node::List(items) => items
            .iter()
            .map(konst)
            .collect::<Option<Vec<_>>>()
            .map(ruleform_eval::Value::List),
        Node::Const(_) | Node::Var { .. } => None,
    }
}

/// Names that need a local slot in generated source. Every name is always
/// written to the output map; a slot is only needed for later reads.
pub fn local_slots(program: &Program, level: OptimizationLevel) -> BTreeSet<String> {
    let mut slots: BTreeSet<String> = program.units.iter().flat_map(|u| u.reads()).collect();
    if level == OptimizationLevel::Basic {
        slots.extend(program.units.iter().flat_map(|u| u.writes()));
        slots.extend(program.external_inputs.iter().cloned());
    }
    slots
}

// ──────────────────────────────────────────────
// Mutable traversal
// ──────────────────────────────────────────────

fn visit_body_mut(body: &mut Body, visit: &mut dyn FnMut(&mut Node)) {
    match body {
        Body::Expr(n) => visit(n),
        Body::Switch(chain) => visit_chain_mut(chain, visit),
        Body::Sum(rules) => {
            for range in rules.iter_mut().flat_map(|r| r.ranges.iter_mut()) {
                visit_test_mut(&mut range.test, visit);
                visit_assigns_mut(&mut range.set_vars, visit);
            }
        }
        Body::Tree(tree) => {
            visit_branches_mut(&mut tree.branches, visit);
            if let Some(leaf) = &mut tree.default {
                visit_assigns_mut(&mut leaf.set_vars, visit);
            }
        }
    }
}

fn visit_chain_mut(chain: &mut Chain, visit: &mut dyn FnMut(&mut Node)) {
    for arm in &mut chain.arms {
        visit_test_mut(&mut arm.test, visit);
        visit_assigns_mut(&mut arm.set_vars, visit);
        visit_outcome_mut(&mut arm.outcome, visit);
    }
    if let Some(d) = &mut chain.default {
        visit_outcome_mut(d, visit);
    }
}

fn visit_outcome_mut(outcome: &mut Outcome, visit: &mut dyn FnMut(&mut Node)) {
    match outcome {
        Outcome::Value(n) => visit(n),
        Outcome::Chain(c) => visit_chain_mut(c, visit),
    }
}

fn visit_test_mut(test: &mut Test, visit: &mut dyn FnMut(&mut Node)) {
    match test {
        Test::Compare { lhs, rhs, .. } => {
            visit(lhs);
            visit(rhs);
        }
        Test::All(children) | Test::Any(children) => {
            for c in children {
                visit_test_mut(c, visit);
            }
        }
    }
}

fn visit_assigns_mut(assigns: &mut [Assign], visit: &mut dyn FnMut(&mut Node)) {
    for a in assigns {
        visit(&mut a.value);
    }
}

fn visit_branches_mut(branches: &mut [TreeBranch], visit: &mut dyn FnMut(&mut Node)) {
    for b in branches {
        if let Some(t) = &mut b.test {
            visit_test_mut(t, visit);
        }
        match &mut b.node {
            TreeNode::Children(children) => visit_branches_mut(children, visit),
            TreeNode::Leaf(leaf) => visit_assigns_mut(&mut leaf.set_vars, visit),
        }
    }
}
