//! Backend-neutral form of an execution plan.
//!
//! Lowering resolves everything the backends should not have to think
//! about: subject operands become variable reads, literals become runtime
//! values, and every operator or call node keeps the source text it was
//! parsed from so both backends report errors the way the interpreter does.

use std::collections::BTreeSet;

use ruleform_core::{
    Assignment, BinaryOp, ClauseResult, CompareOp, Condition, ExecutionPlan, Expr, Formula,
    FormulaKind, Operand, ScoreBranch, ScoreLeaf, ScoreNode, Switch, UnaryOp,
};
use ruleform_eval::Value;

use crate::error::CodegenError;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const(Value),
    Var {
        name: String,
        intermediate: bool,
    },
    Neg {
        operand: Box<Node>,
        text: String,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
        text: String,
    },
    Call {
        name: String,
        args: Vec<Node>,
        text: String,
    },
    /// A list operand whose elements are read at run time.
    List(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    Compare {
        op: CompareOp,
        lhs: Node,
        rhs: Node,
        text: String,
    },
    All(Vec<Test>),
    Any(Vec<Test>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    pub name: String,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub subject: Option<String>,
    pub arms: Vec<Arm>,
    pub default: Option<Box<Outcome>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arm {
    pub test: Test,
    pub set_vars: Vec<Assign>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Node),
    Chain(Chain),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SumRule {
    pub subject: Option<String>,
    pub ranges: Vec<SumRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SumRange {
    pub test: Test,
    pub contribution: f64,
    pub set_vars: Vec<Assign>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub dimensions: Vec<String>,
    pub branches: Vec<TreeBranch>,
    pub default: Option<TreeLeaf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeBranch {
    pub test: Option<Test>,
    pub node: TreeNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Children(Vec<TreeBranch>),
    Leaf(TreeLeaf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeLeaf {
    pub primary: Value,
    pub decision: Value,
    pub level: Value,
    pub set_vars: Vec<Assign>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Expr(Node),
    Switch(Chain),
    Sum(Vec<SumRule>),
    Tree(Tree),
}

/// One formula, lowered.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: String,
    pub kind: &'static str,
    /// Names checked for presence before the body runs.
    pub requires: Vec<String>,
    /// Names receiving the primary value.
    pub targets: Vec<String>,
    pub decision_output: Option<String>,
    pub level_output: Option<String>,
    pub body: Body,
}

/// A lowered execution plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub document_id: Option<String>,
    pub units: Vec<Unit>,
    pub external_inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Functions called anywhere in the document, sorted.
    pub functions: Vec<String>,
}

pub fn lower(plan: &ExecutionPlan) -> Result<Program, CodegenError> {
    let units = plan
        .formulas
        .iter()
        .map(lower_formula)
        .collect::<Result<Vec<_>, _>>()?;
    let functions: BTreeSet<String> = plan.formulas.iter().flat_map(Formula::functions).collect();
    Ok(Program {
        document_id: plan.document_id.clone(),
        units,
        external_inputs: plan.external_inputs.clone(),
        outputs: plan.outputs(),
        functions: functions.into_iter().collect(),
    })
}

fn lower_formula(f: &Formula) -> Result<Unit, CodegenError> {
    let mut decision_output = None;
    let mut level_output = None;
    let body = match &f.kind {
        FormulaKind::Expression(e) => Body::Expr(lower_expr(&e.expr)),
        FormulaKind::Switch(s) => Body::Switch(lower_switch(&f.id, s)?),
        FormulaKind::Accumulative(a) => {
            let rules = a
                .rules
                .iter()
                .map(|rule| {
                    let ranges = rule
                        .ranges
                        .iter()
                        .map(|r| {
                            Ok(SumRange {
                                test: lower_condition(&f.id, &r.condition, rule.subject.as_deref())?,
                                contribution: r.contribution(),
                                set_vars: lower_assignments(&r.set_vars),
                            })
                        })
                        .collect::<Result<Vec<_>, CodegenError>>()?;
                    Ok(SumRule {
                        subject: rule.subject.clone(),
                        ranges,
                    })
                })
                .collect::<Result<Vec<_>, CodegenError>>()?;
            Body::Sum(rules)
        }
        FormulaKind::MultiDimensional(m) => {
            if m.has_decision() {
                decision_output = Some(f.decision_output());
            }
            if m.has_level() {
                level_output = Some(f.level_output());
            }
            Body::Tree(Tree {
                dimensions: m.dimensions.clone(),
                branches: lower_branches(&f.id, &m.tree, &m.dimensions, 0)?,
                default: m.default.as_ref().map(lower_leaf),
            })
        }
    };
    Ok(Unit {
        id: f.id.clone(),
        kind: f.kind_name(),
        requires: f.declared_reads(),
        targets: f.primary_targets(),
        decision_output,
        level_output,
        body,
    })
}

pub fn lower_expr(e: &Expr) -> Node {
    match e {
        Expr::Number(n) => Node::Const(Value::Number(*n)),
        Expr::Str(s) => Node::Const(Value::Str(s.clone())),
        Expr::Bool(b) => Node::Const(Value::Bool(*b)),
        Expr::Null => Node::Const(Value::Null),
        Expr::Var { name, intermediate } => Node::Var {
            name: name.clone(),
            intermediate: *intermediate,
        },
        Expr::Group(inner) => lower_expr(inner),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
        } => Node::Neg {
            operand: Box::new(lower_expr(operand)),
            text: e.to_string(),
        },
        Expr::Binary { op, lhs, rhs } => Node::Binary {
            op: *op,
            lhs: Box::new(lower_expr(lhs)),
            rhs: Box::new(lower_expr(rhs)),
            text: e.to_string(),
        },
        Expr::Call { name, args } => Node::Call {
            name: name.clone(),
            args: args.iter().map(lower_expr).collect(),
            text: e.to_string(),
        },
    }
}

fn lower_switch(formula: &str, s: &Switch) -> Result<Chain, CodegenError> {
    let subject = s.subject.as_deref();
    let arms = s
        .clauses
        .iter()
        .map(|c| {
            Ok(Arm {
                test: lower_condition(formula, &c.condition, subject)?,
                set_vars: lower_assignments(&c.set_vars),
                outcome: lower_result(formula, &c.result)?,
            })
        })
        .collect::<Result<Vec<_>, CodegenError>>()?;
    let default = match &s.default {
        Some(d) => Some(Box::new(lower_result(formula, d)?)),
        None => None,
    };
    Ok(Chain {
        subject: s.subject.clone(),
        arms,
        default,
    })
}

fn lower_result(formula: &str, r: &ClauseResult) -> Result<Outcome, CodegenError> {
    Ok(match r {
        ClauseResult::Literal(lit) => Outcome::Value(Node::Const(Value::from_literal(lit))),
        ClauseResult::Expr(e) => Outcome::Value(lower_expr(e)),
        ClauseResult::Switch(inner) => Outcome::Chain(lower_switch(formula, inner)?),
    })
}

fn lower_condition(
    formula: &str,
    c: &Condition,
    subject: Option<&str>,
) -> Result<Test, CodegenError> {
    Ok(match c {
        Condition::And(children) => Test::All(
            children
                .iter()
                .map(|c| lower_condition(formula, c, subject))
                .collect::<Result<_, _>>()?,
        ),
        Condition::Or(children) => Test::Any(
            children
                .iter()
                .map(|c| lower_condition(formula, c, subject))
                .collect::<Result<_, _>>()?,
        ),
        Condition::Comparison { op, left, right } => {
            let (lhs, ltext) = lower_operand(formula, left, subject)?;
            let (rhs, rtext) = lower_operand(formula, right, subject)?;
            Test::Compare {
                op: *op,
                lhs,
                rhs,
                text: format!("{} {} {}", ltext, op.symbol(), rtext),
            }
        }
    })
}

fn lower_operand(
    formula: &str,
    o: &Operand,
    subject: Option<&str>,
) -> Result<(Node, String), CodegenError> {
    Ok(match o {
        Operand::Literal(lit) => (Node::Const(Value::from_literal(lit)), lit.to_string()),
        Operand::Expr(e) => (lower_expr(e), e.to_string()),
        Operand::List(items) => {
            let nodes = items
                .iter()
                .map(|i| lower_operand(formula, i, subject).map(|(n, _)| n))
                .collect::<Result<_, _>>()?;
            (Node::List(nodes), o.to_string())
        }
        Operand::Subject => {
            let name = subject
                .ok_or_else(|| CodegenError::unsupported(formula, "a comparison without a subject"))?;
            (
                Node::Var {
                    name: name.to_owned(),
                    intermediate: false,
                },
                name.to_owned(),
            )
        }
    })
}

fn lower_assignments(assignments: &[Assignment]) -> Vec<Assign> {
    assignments
        .iter()
        .map(|a| Assign {
            name: a.name.clone(),
            value: lower_assigned(&a.value),
        })
        .collect()
}

fn lower_assigned(value: &Operand) -> Node {
    match value {
        Operand::Literal(lit) => Node::Const(Value::from_literal(lit)),
        Operand::Expr(e) => lower_expr(e),
        Operand::List(items) => Node::List(items.iter().map(lower_assigned).collect()),
        // set_vars values never refer to a subject
        Operand::Subject => Node::Const(Value::Null),
    }
}

fn lower_branches(
    formula: &str,
    branches: &[ScoreBranch],
    dimensions: &[String],
    level: usize,
) -> Result<Vec<TreeBranch>, CodegenError> {
    // Levels past the last dimension are never visited.
    let Some(subject) = dimensions.get(level).map(String::as_str) else {
        return Ok(Vec::new());
    };
    let subject = Some(subject);
    branches
        .iter()
        .map(|b| {
            let test = match &b.condition {
                Some(c) => Some(lower_condition(formula, c, subject)?),
                None => None,
            };
            let node = match &b.node {
                ScoreNode::Children(children) => {
                    TreeNode::Children(lower_branches(formula, children, dimensions, level + 1)?)
                }
                ScoreNode::Leaf(leaf) => TreeNode::Leaf(lower_leaf(leaf)),
            };
            Ok(TreeBranch { test, node })
        })
        .collect()
}

fn lower_leaf(leaf: &ScoreLeaf) -> TreeLeaf {
    let label = |l: &Option<ruleform_core::Literal>| l.as_ref().map_or(Value::Null, Value::from_literal);
    TreeLeaf {
        primary: Value::from_literal(&leaf.primary()),
        decision: label(&leaf.decision),
        level: label(&leaf.level),
        set_vars: lower_assignments(&leaf.set_vars),
    }
}

// ──────────────────────────────────────────────
// Traversal
// ──────────────────────────────────────────────

impl Node {
    pub fn walk(&self, visit: &mut dyn FnMut(&Node)) {
        visit(self);
        match self {
            Node::Neg { operand, .. } => operand.walk(visit),
            Node::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Node::Call { args, .. } | Node::List(args) => {
                for a in args {
                    a.walk(visit);
                }
            }
            Node::Const(_) | Node::Var { .. } => {}
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Node::Const(_))
    }
}

impl Test {
    pub fn visit_nodes(&self, visit: &mut dyn FnMut(&Node)) {
        match self {
            Test::Compare { lhs, rhs, .. } => {
                visit(lhs);
                visit(rhs);
            }
            Test::All(children) | Test::Any(children) => {
                for c in children {
                    c.visit_nodes(visit);
                }
            }
        }
    }
}

impl Chain {
    fn visit_nodes(&self, visit: &mut dyn FnMut(&Node)) {
        for arm in &self.arms {
            arm.test.visit_nodes(visit);
            for a in &arm.set_vars {
                visit(&a.value);
            }
            arm.outcome.visit_nodes(visit);
        }
        if let Some(d) = &self.default {
            d.visit_nodes(visit);
        }
    }
}

impl Outcome {
    fn visit_nodes(&self, visit: &mut dyn FnMut(&Node)) {
        match self {
            Outcome::Value(n) => visit(n),
            Outcome::Chain(c) => c.visit_nodes(visit),
        }
    }
}

fn visit_branches(branches: &[TreeBranch], visit: &mut dyn FnMut(&Node)) {
    for b in branches {
        if let Some(t) = &b.test {
            t.visit_nodes(visit);
        }
        match &b.node {
            TreeNode::Children(children) => visit_branches(children, visit),
            TreeNode::Leaf(leaf) => {
                for a in &leaf.set_vars {
                    visit(&a.value);
                }
            }
        }
    }
}

impl Unit {
    /// Visit every top-level expression node of the unit (not recursing
    /// into sub-nodes; use [`Node::walk`] for that).
    pub fn visit_nodes(&self, visit: &mut dyn FnMut(&Node)) {
        match &self.body {
            Body::Expr(n) => visit(n),
            Body::Switch(chain) => chain.visit_nodes(visit),
            Body::Sum(rules) => {
                for rule in rules {
                    for r in &rule.ranges {
                        r.test.visit_nodes(visit);
                        for a in &r.set_vars {
                            visit(&a.value);
                        }
                    }
                }
            }
            Body::Tree(tree) => {
                visit_branches(&tree.branches, visit);
                if let Some(leaf) = &tree.default {
                    for a in &leaf.set_vars {
                        visit(&a.value);
                    }
                }
            }
        }
    }

    /// Every name this unit reads: presence checks, subjects, dimensions
    /// and variable nodes.
    pub fn reads(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.requires.iter().cloned().collect();
        fn subjects(chain: &Chain, out: &mut BTreeSet<String>) {
            if let Some(s) = &chain.subject {
                out.insert(s.clone());
            }
            for arm in &chain.arms {
                if let Outcome::Chain(inner) = &arm.outcome {
                    subjects(inner, out);
                }
            }
            if let Some(d) = &chain.default {
                if let Outcome::Chain(inner) = d.as_ref() {
                    subjects(inner, out);
                }
            }
        }
        match &self.body {
            Body::Switch(chain) => subjects(chain, &mut out),
            Body::Sum(rules) => out.extend(rules.iter().filter_map(|r| r.subject.clone())),
            Body::Tree(tree) => out.extend(tree.dimensions.iter().cloned()),
            Body::Expr(_) => {}
        }
        self.visit_nodes(&mut |n| {
            n.walk(&mut |inner| {
                if let Node::Var { name, .. } = inner {
                    out.insert(name.clone());
                }
            })
        });
        out
    }

    /// Every name this unit may write.
    pub fn writes(&self) -> Vec<String> {
        let mut out = self.targets.clone();
        out.extend(self.decision_output.iter().cloned());
        out.extend(self.level_output.iter().cloned());
        let mut push = |a: &Assign| {
            if !out.contains(&a.name) {
                out.push(a.name.clone());
            }
        };
        fn chain_assigns(chain: &Chain, push: &mut dyn FnMut(&Assign)) {
            for arm in &chain.arms {
                arm.set_vars.iter().for_each(&mut *push);
                if let Outcome::Chain(inner) = &arm.outcome {
                    chain_assigns(inner, push);
                }
            }
            if let Some(d) = &chain.default {
                if let Outcome::Chain(inner) = d.as_ref() {
                    chain_assigns(inner, push);
                }
            }
        }
        fn tree_assigns(branches: &[TreeBranch], push: &mut dyn FnMut(&Assign)) {
            for b in branches {
                match &b.node {
                    TreeNode::Children(children) => tree_assigns(children, push),
                    TreeNode::Leaf(leaf) => leaf.set_vars.iter().for_each(&mut *push),
                }
            }
        }
        match &self.body {
            Body::Expr(_) => {}
            Body::Switch(chain) => chain_assigns(chain, &mut push),
            Body::Sum(rules) => {
                for rule in rules {
                    for r in &rule.ranges {
                        r.set_vars.iter().for_each(&mut push);
                    }
                }
            }
            Body::Tree(tree) => {
                tree_assigns(&tree.branches, &mut push);
                if let Some(leaf) = &tree.default {
                    leaf.set_vars.iter().for_each(&mut push);
                }
            }
        }
        out
    }
}
