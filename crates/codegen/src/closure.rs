//! In-process backend: compiles a lowered program into a tree of boxed
//! closures. Functions are resolved once at compile time, so a run does no
//! registry lookups and no AST matching.

use std::collections::BTreeMap;

use ruleform_eval::{ops, parse_inputs, Context, EvalError, ExprError, FunctionRegistry, Value};

use crate::ir::{
    Assign, Body, Chain, Node, Outcome, Program, SumRule, Test, Tree, TreeBranch, TreeLeaf,
    TreeNode,
};

type Eval = Box<dyn Fn(&Context) -> Result<Value, ExprError> + Send + Sync>;
type Check = Box<dyn Fn(&Context) -> Result<bool, ExprError> + Send + Sync>;

/// A rule document compiled for repeated in-process evaluation. Produces
/// the same values and errors as the interpreter.
pub struct CompiledRules {
    document_id: Option<String>,
    units: Vec<CompiledUnit>,
    external_inputs: Vec<String>,
    outputs: Vec<String>,
}

impl std::fmt::Debug for CompiledRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRules")
            .field("document_id", &self.document_id)
            .field("order", &self.order())
            .finish()
    }
}

impl CompiledRules {
    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// Formula ids in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.id.as_str()).collect()
    }

    pub fn external_inputs(&self) -> &[String] {
        &self.external_inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Run against a JSON inputs object.
    pub fn run(&self, inputs: &serde_json::Value) -> Result<BTreeMap<String, Value>, EvalError> {
        self.run_values(parse_inputs(inputs)?)
    }

    pub fn run_values(
        &self,
        inputs: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, EvalError> {
        let mut ctx = Context::new(inputs);
        for unit in &self.units {
            unit.run(&mut ctx).map_err(|e| e.in_formula(&unit.id))?;
        }
        Ok(ctx.into_outputs())
    }
}

pub fn build(program: &Program, registry: &FunctionRegistry) -> CompiledRules {
    CompiledRules {
        document_id: program.document_id.clone(),
        units: program
            .units
            .iter()
            .map(|u| CompiledUnit {
                id: u.id.clone(),
                requires: u.requires.clone(),
                targets: u.targets.clone(),
                decision_output: u.decision_output.clone(),
                level_output: u.level_output.clone(),
                body: match &u.body {
                    Body::Expr(n) => CompiledBody::Expr(node(n, registry)),
                    Body::Switch(c) => CompiledBody::Switch(chain(c, registry)),
                    Body::Sum(rules) => {
                        CompiledBody::Sum(rules.iter().map(|r| sum_rule(r, registry)).collect())
                    }
                    Body::Tree(t) => CompiledBody::Tree(tree(t, registry)),
                },
            })
            .collect(),
        external_inputs: program.external_inputs.clone(),
        outputs: program.outputs.clone(),
    }
}

// ──────────────────────────────────────────────
// Expressions and tests
// ──────────────────────────────────────────────

fn node(n: &Node, registry: &FunctionRegistry) -> Eval {
    match n {
        Node::Const(v) => {
            let v = v.clone();
            Box::new(move |_| Ok(v.clone()))
        }
        Node::Var { name, intermediate } => {
            let (name, intermediate) = (name.clone(), *intermediate);
            Box::new(move |ctx| ctx.lookup(&name, intermediate).cloned())
        }
        Node::Neg { operand, text } => {
            let operand = node(operand, registry);
            let text = text.clone();
            Box::new(move |ctx| {
                ops::negate(&operand(ctx)?).map_err(|e| ExprError::from_op(e, text.as_str()))
            })
        }
        Node::Binary { op, lhs, rhs, text } => {
            let (op, lhs, rhs, text) = (*op, node(lhs, registry), node(rhs, registry), text.clone());
            Box::new(move |ctx| {
                let l = lhs(ctx)?;
                let r = rhs(ctx)?;
                ops::binary(op, &l, &r).map_err(|e| ExprError::from_op(e, text.as_str()))
            })
        }
        Node::List(items) => {
            let items: Vec<Eval> = items.iter().map(|i| node(i, registry)).collect();
            Box::new(move |ctx| {
                items
                    .iter()
                    .map(|i| i(ctx))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            })
        }
        Node::Call { name, args, text } => {
            let Some(function) = registry.bind(name) else {
                let name = name.clone();
                return Box::new(move |_| Err(ExprError::UnknownFunction { name: name.clone() }));
            };
            let args: Vec<Eval> = args.iter().map(|a| node(a, registry)).collect();
            let text = text.clone();
            Box::new(move |ctx| {
                let values = args.iter().map(|a| a(ctx)).collect::<Result<Vec<_>, _>>()?;
                function
                    .call(&values)
                    .map_err(|e| ExprError::from_call(e, text.as_str()))
            })
        }
    }
}

fn test(t: &Test, registry: &FunctionRegistry) -> Check {
    match t {
        Test::Compare { op, lhs, rhs, text } => {
            let (op, lhs, rhs, text) = (*op, node(lhs, registry), node(rhs, registry), text.clone());
            Box::new(move |ctx| {
                let l = lhs(ctx)?;
                let r = rhs(ctx)?;
                ops::compare(op, &l, &r).map_err(|e| ExprError::from_op(e, text.as_str()))
            })
        }
        Test::All(children) => {
            let children: Vec<Check> = children.iter().map(|c| test(c, registry)).collect();
            Box::new(move |ctx| {
                for c in &children {
                    if !c(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            })
        }
        Test::Any(children) => {
            let children: Vec<Check> = children.iter().map(|c| test(c, registry)).collect();
            Box::new(move |ctx| {
                for c in &children {
                    if c(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
        }
    }
}

struct CompiledAssign {
    name: String,
    value: Eval,
}

fn assigns(list: &[Assign], registry: &FunctionRegistry) -> Vec<CompiledAssign> {
    list.iter()
        .map(|a| CompiledAssign {
            name: a.name.clone(),
            value: node(&a.value, registry),
        })
        .collect()
}

// ──────────────────────────────────────────────
// Formula bodies
// ──────────────────────────────────────────────

struct CompiledUnit {
    id: String,
    requires: Vec<String>,
    targets: Vec<String>,
    decision_output: Option<String>,
    level_output: Option<String>,
    body: CompiledBody,
}

enum CompiledBody {
    Expr(Eval),
    Switch(CompiledChain),
    Sum(Vec<CompiledRule>),
    Tree(CompiledTree),
}

impl CompiledUnit {
    fn run(&self, ctx: &mut Context) -> Result<(), ExprError> {
        for name in &self.requires {
            ctx.lookup(name, false)?;
        }
        let mut path: Vec<&[CompiledAssign]> = Vec::new();
        let value = match &self.body {
            CompiledBody::Expr(e) => e(ctx)?,
            CompiledBody::Switch(chain) => chain.select(ctx, &mut path)?,
            CompiledBody::Sum(rules) => {
                let mut total = 0.0;
                for rule in rules {
                    if let Some((contribution, set_vars)) = rule.first_match(ctx)? {
                        total += contribution;
                        path.push(set_vars);
                    }
                }
                ops::finite(total, "score total").map_err(|e| ExprError::from_op(e, "scoring"))?
            }
            CompiledBody::Tree(tree) => {
                let leaf = tree.descend(ctx)?;
                path.push(&leaf.set_vars);
                for target in &self.targets {
                    ctx.bind(target, leaf.primary.clone());
                }
                if let Some(name) = &self.decision_output {
                    ctx.bind(name, leaf.decision.clone());
                }
                if let Some(name) = &self.level_output {
                    ctx.bind(name, leaf.level.clone());
                }
                return apply(&path, ctx);
            }
        };
        for target in &self.targets {
            ctx.bind(target, value.clone());
        }
        apply(&path, ctx)
    }
}

fn apply(path: &[&[CompiledAssign]], ctx: &mut Context) -> Result<(), ExprError> {
    for group in path {
        for a in group.iter() {
            let value = (a.value)(ctx)?;
            ctx.bind(&a.name, value);
        }
    }
    Ok(())
}

struct CompiledChain {
    subject: Option<String>,
    arms: Vec<CompiledArm>,
    default: Option<Box<CompiledOutcome>>,
}

struct CompiledArm {
    test: Check,
    set_vars: Vec<CompiledAssign>,
    outcome: CompiledOutcome,
}

enum CompiledOutcome {
    Value(Eval),
    Chain(CompiledChain),
}

fn chain(c: &Chain, registry: &FunctionRegistry) -> CompiledChain {
    CompiledChain {
        subject: c.subject.clone(),
        arms: c
            .arms
            .iter()
            .map(|arm| CompiledArm {
                test: test(&arm.test, registry),
                set_vars: assigns(&arm.set_vars, registry),
                outcome: outcome(&arm.outcome, registry),
            })
            .collect(),
        default: c.default.as_ref().map(|d| Box::new(outcome(d, registry))),
    }
}

fn outcome(o: &Outcome, registry: &FunctionRegistry) -> CompiledOutcome {
    match o {
        Outcome::Value(n) => CompiledOutcome::Value(node(n, registry)),
        Outcome::Chain(c) => CompiledOutcome::Chain(chain(c, registry)),
    }
}

impl CompiledChain {
    fn select<'a>(
        &'a self,
        ctx: &Context,
        path: &mut Vec<&'a [CompiledAssign]>,
    ) -> Result<Value, ExprError> {
        let subject = match &self.subject {
            Some(name) => Some((name, ctx.lookup(name, false)?)),
            None => None,
        };
        for arm in &self.arms {
            if (arm.test)(ctx)? {
                path.push(&arm.set_vars);
                return arm.outcome.value(ctx, path);
            }
        }
        match &self.default {
            Some(d) => d.value(ctx, path),
            None => Err(ExprError::NoMatch {
                detail: match subject {
                    Some((name, value)) => {
                        format!("no clause matched {} = {} and there is no default", name, value)
                    }
                    None => "no clause matched and there is no default".into(),
                },
            }),
        }
    }
}

impl CompiledOutcome {
    fn value<'a>(
        &'a self,
        ctx: &Context,
        path: &mut Vec<&'a [CompiledAssign]>,
    ) -> Result<Value, ExprError> {
        match self {
            CompiledOutcome::Value(e) => e(ctx),
            CompiledOutcome::Chain(c) => c.select(ctx, path),
        }
    }
}

struct CompiledRule {
    subject: Option<String>,
    ranges: Vec<(Check, f64, Vec<CompiledAssign>)>,
}

fn sum_rule(r: &SumRule, registry: &FunctionRegistry) -> CompiledRule {
    CompiledRule {
        subject: r.subject.clone(),
        ranges: r
            .ranges
            .iter()
            .map(|range| {
                (
                    test(&range.test, registry),
                    range.contribution,
                    assigns(&range.set_vars, registry),
                )
            })
            .collect(),
    }
}

impl CompiledRule {
    fn first_match(&self, ctx: &Context) -> Result<Option<(f64, &[CompiledAssign])>, ExprError> {
        if let Some(name) = &self.subject {
            ctx.lookup(name, false)?;
        }
        for (check, contribution, set_vars) in &self.ranges {
            if check(ctx)? {
                return Ok(Some((*contribution, set_vars.as_slice())));
            }
        }
        Ok(None)
    }
}

struct CompiledTree {
    dimensions: Vec<String>,
    branches: Vec<CompiledBranch>,
    default: Option<CompiledLeaf>,
}

struct CompiledBranch {
    test: Option<Check>,
    node: CompiledTreeNode,
}

enum CompiledTreeNode {
    Children(Vec<CompiledBranch>),
    Leaf(CompiledLeaf),
}

struct CompiledLeaf {
    primary: Value,
    decision: Value,
    level: Value,
    set_vars: Vec<CompiledAssign>,
}

fn tree(t: &Tree, registry: &FunctionRegistry) -> CompiledTree {
    CompiledTree {
        dimensions: t.dimensions.clone(),
        branches: branches(&t.branches, registry),
        default: t.default.as_ref().map(|l| leaf(l, registry)),
    }
}

fn branches(list: &[TreeBranch], registry: &FunctionRegistry) -> Vec<CompiledBranch> {
    list.iter()
        .map(|b| CompiledBranch {
            test: b.test.as_ref().map(|t| test(t, registry)),
            node: match &b.node {
                TreeNode::Children(children) => {
                    CompiledTreeNode::Children(branches(children, registry))
                }
                TreeNode::Leaf(l) => CompiledTreeNode::Leaf(leaf(l, registry)),
            },
        })
        .collect()
}

fn leaf(l: &TreeLeaf, registry: &FunctionRegistry) -> CompiledLeaf {
    CompiledLeaf {
        primary: l.primary.clone(),
        decision: l.decision.clone(),
        level: l.level.clone(),
        set_vars: assigns(&l.set_vars, registry),
    }
}

impl CompiledTree {
    fn descend(&self, ctx: &Context) -> Result<&CompiledLeaf, ExprError> {
        let mut level = self.branches.as_slice();
        for dimension in &self.dimensions {
            let value = ctx.lookup(dimension, false)?;
            let mut chosen = None;
            for branch in level {
                let hit = match &branch.test {
                    Some(check) => check(ctx)?,
                    None => true,
                };
                if hit {
                    chosen = Some(&branch.node);
                    break;
                }
            }
            match chosen {
                Some(CompiledTreeNode::Leaf(leaf)) => return Ok(leaf),
                Some(CompiledTreeNode::Children(children)) => level = children.as_slice(),
                None => return self.fallback(format!("{} = {}", dimension, value)),
            }
        }
        self.fallback("the tree ends before a leaf".into())
    }

    fn fallback(&self, at: String) -> Result<&CompiledLeaf, ExprError> {
        self.default.as_ref().ok_or_else(|| ExprError::NoMatch {
            detail: format!("no scoring branch matched {} and there is no default", at),
        })
    }
}
