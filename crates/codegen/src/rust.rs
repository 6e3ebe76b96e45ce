//! Rust source backend.
//!
//! Each formula becomes one block inside the entry-point function: an
//! assignment for expressions, an if/else-if chain for switches, an
//! unrolled conditional sum for accumulative scoring and a labeled block
//! per decision tree. Every variable lives in an `Option<Value>` slot
//! seeded from the inputs, so a missing read fails the same way the
//! interpreter does.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use ruleform_core::{BinaryOp, CompareOp};
use ruleform_eval::{FunctionRegistry, Value};

use crate::error::CodegenError;
use crate::ir::{
    Assign, Body, Chain, Node, Outcome, Program, SumRule, Test, Tree, TreeBranch, TreeLeaf,
    TreeNode, Unit,
};
use crate::optimize::{local_slots, OptimizationLevel};
use crate::prelude::{builtin_source, PRELUDE};

const INDENT: &str = "    ";

/// Names the prelude defines; an entry point cannot reuse them.
const RESERVED: &[&str] = &[
    "Value", "RuleError", "Fault", "Op", "Cmp", "Builtin", "format_number", "input", "get",
    "get_ref",
    "neg", "arith", "values_equal", "ordering", "test", "compare", "call", "number",
    "optional_number", "numbers", "finite",
];

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
    "type", "unsafe", "use", "where", "while", "abstract", "become", "box", "do", "final",
    "macro", "override", "priv", "try", "typeof", "unsized", "virtual", "yield",
];

pub struct EmitOptions<'a> {
    pub function_name: &'a str,
    pub include_comments: bool,
    pub level: OptimizationLevel,
}

pub fn check_function_name(name: &str) -> Result<(), CodegenError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid = valid_start
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name != "_"
        && !KEYWORDS.contains(&name)
        && !RESERVED.contains(&name)
        && !name.starts_with("fn_");
    if valid {
        Ok(())
    } else {
        Err(CodegenError::InvalidFunctionName(name.to_owned()))
    }
}

/// Emit a complete module for `program`.
pub fn emit(
    program: &Program,
    registry: &FunctionRegistry,
    opts: &EmitOptions<'_>,
) -> Result<String, CodegenError> {
    check_function_name(opts.function_name)?;
    let helpers = helpers(program)?;
    let slots = Slots::new(local_slots(program, opts.level));

    let mut out = String::new();
    writeln!(out, "// Auto-generated by ruleform. Do not edit.").ok();
    if let Some(id) = &program.document_id {
        writeln!(out, "// Document: {}", id).ok();
    }
    writeln!(
        out,
        "// Formulas: {} ({} optimization)",
        program.units.len(),
        opts.level.name()
    )
    .ok();
    out.push('\n');
    out.push_str(
        "#![allow(dead_code, unused_mut, unused_variables, unused_parens, unused_assignments, unreachable_code, clippy::all)]\n\n",
    );
    out.push_str(PRELUDE);
    for src in helpers.values() {
        out.push('\n');
        out.push_str(src);
    }
    out.push('\n');

    if opts.include_comments && !program.external_inputs.is_empty() {
        writeln!(out, "/// Inputs: {}.", program.external_inputs.join(", ")).ok();
    }
    writeln!(
        out,
        "pub fn {}(inputs: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, RuleError> {{",
        opts.function_name
    )
    .ok();
    for (name, ident) in &slots.idents {
        writeln!(
            out,
            "{}let mut {}: Option<Value> = input(inputs, {:?});",
            INDENT, ident, name
        )
        .ok();
    }
    writeln!(out, "{}let mut out: BTreeMap<String, Value> = BTreeMap::new();", INDENT).ok();

    let mut emitter = Emitter {
        out,
        slots: &slots,
        registry,
    };
    for unit in &program.units {
        emitter.out.push('\n');
        if opts.include_comments {
            emitter.line(1, &format!("// {} ({})", unit.id, unit.kind));
        }
        emitter.unit(unit);
    }
    let mut out = emitter.out;
    writeln!(out, "\n{}Ok(out)\n}}", INDENT).ok();
    Ok(out)
}

/// Helper source for every called function, keyed by name. Fails on the
/// first call without a translation.
fn helpers(program: &Program) -> Result<BTreeMap<String, &'static str>, CodegenError> {
    let mut helpers = BTreeMap::new();
    for unit in &program.units {
        let mut missing = None;
        unit.visit_nodes(&mut |n| {
            n.walk(&mut |inner| {
                if let Node::Call { name, .. } = inner {
                    match builtin_source(name) {
                        Some(src) => {
                            helpers.insert(name.clone(), src);
                        }
                        None => {
                            missing.get_or_insert_with(|| name.clone());
                        }
                    }
                }
            })
        });
        if let Some(name) = missing {
            return Err(CodegenError::unsupported(
                &unit.id,
                format!("function '{}()'", name),
            ));
        }
    }
    Ok(helpers)
}

/// Local variable names for slots, sanitized and unique.
struct Slots {
    idents: BTreeMap<String, String>,
}

impl Slots {
    fn new(names: BTreeSet<String>) -> Self {
        let mut taken = BTreeSet::new();
        let mut idents = BTreeMap::new();
        for name in names {
            let base: String = format!("v_{}", name)
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect();
            let mut ident = base.clone();
            let mut n = 2;
            while !taken.insert(ident.clone()) {
                ident = format!("{}_{}", base, n);
                n += 1;
            }
            idents.insert(name, ident);
        }
        Slots { idents }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.idents.get(name).map(String::as_str)
    }
}

struct Emitter<'a> {
    out: String,
    slots: &'a Slots,
    registry: &'a FunctionRegistry,
}

impl Emitter<'_> {
    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn unit(&mut self, unit: &Unit) {
        self.line(1, "{");
        self.line(2, &format!("const F: &str = {:?};", unit.id));
        for name in &unit.requires {
            let read = self.read(name, false);
            self.line(2, &format!("let _ = {};", read));
        }
        match &unit.body {
            Body::Expr(n) => {
                let value = self.node(n);
                self.line(2, &format!("let value = {};", value));
                self.bind_all(2, &unit.targets, "value");
            }
            Body::Switch(chain) => {
                self.line(2, "let mut path: Vec<u32> = Vec::new();");
                let mut arms = Vec::new();
                let value = self.chain(chain, 2, &mut arms);
                self.out.push_str(&format!("{}{}let value = {};\n", INDENT, INDENT, value));
                self.bind_all(2, &unit.targets, "value");
                self.apply_path(&arms);
            }
            Body::Sum(rules) => {
                self.line(2, "let mut path: Vec<u32> = Vec::new();");
                self.line(2, "let mut total = 0.0_f64;");
                let mut arms = Vec::new();
                for rule in rules {
                    self.sum_rule(rule, &mut arms);
                }
                self.line(2, "if !total.is_finite() {");
                self.line(
                    3,
                    "return Err(RuleError::Evaluation { formula: F, message: \"result of 'score total' is not a finite number\".to_string(), expr: \"scoring\" });",
                );
                self.line(2, "}");
                self.line(2, "let value = Value::Number(total);");
                self.bind_all(2, &unit.targets, "value");
                self.apply_path(&arms);
            }
            Body::Tree(tree) => self.tree(unit, tree),
        }
        self.line(1, "}");
    }

    // ──────────────────────────────────────────
    // Bindings
    // ──────────────────────────────────────────

    fn bind(&mut self, depth: usize, name: &str, value: &str) {
        if let Some(ident) = self.slots.get(name) {
            let ident = ident.to_owned();
            self.line(depth, &format!("{} = Some({}.clone());", ident, value));
        }
        self.line(
            depth,
            &format!("out.insert({:?}.to_string(), {}.clone());", name, value),
        );
    }

    fn bind_all(&mut self, depth: usize, names: &[String], value: &str) {
        for name in names {
            self.bind(depth, name, value);
        }
    }

    fn assigns(&mut self, depth: usize, assigns: &[Assign]) {
        for a in assigns {
            let value = self.node(&a.value);
            self.line(depth, "{");
            self.line(depth + 1, &format!("let assigned = {};", value));
            self.bind(depth + 1, &a.name, "assigned");
            self.line(depth, "}");
        }
    }

    /// `set_vars` of the arms on the taken path, applied after the
    /// primary value is bound.
    fn apply_path(&mut self, arms: &[&[Assign]]) {
        if arms.iter().all(|a| a.is_empty()) {
            return;
        }
        self.line(2, "for arm in path {");
        self.line(3, "match arm {");
        for (i, list) in arms.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            self.line(4, &format!("{} => {{", i));
            self.assigns(5, list);
            self.line(4, "}");
        }
        self.line(4, "_ => {}");
        self.line(3, "}");
        self.line(2, "}");
    }

    // ──────────────────────────────────────────
    // Expressions and tests
    // ──────────────────────────────────────────

    fn read(&self, name: &str, intermediate: bool) -> String {
        let getter = if intermediate { "get_ref" } else { "get" };
        match self.slots.get(name) {
            Some(ident) => format!("{}(F, &{}, {:?})?", getter, ident, name),
            // Every read name has a slot; this keeps the code total.
            None => format!("{}(F, &input(inputs, {:?}), {:?})?", getter, name, name),
        }
    }

    fn node(&self, n: &Node) -> String {
        match n {
            Node::Const(v) => value_literal(v),
            Node::Var { name, intermediate } => self.read(name, *intermediate),
            Node::List(items) => format!(
                "Value::List(vec![{}])",
                items.iter().map(|i| self.node(i)).collect::<Vec<_>>().join(", ")
            ),
            Node::Neg { operand, text } => {
                format!("neg(F, {:?}, {})?", text, self.node(operand))
            }
            Node::Binary { op, lhs, rhs, text } => {
                let (l, r) = (self.node(lhs), self.node(rhs));
                match op {
                    BinaryOp::Compare(c) => format!(
                        "Value::Bool(compare(F, {:?}, {}, &{}, &{})?)",
                        text,
                        cmp_variant(*c),
                        l,
                        r
                    ),
                    arith => format!(
                        "arith(F, {:?}, {}, {}, {})?",
                        text,
                        op_variant(*arith),
                        l,
                        r
                    ),
                }
            }
            Node::Call { name, args, text } => {
                let (min, max) = self
                    .registry
                    .get(name)
                    .map_or((0, None), |m| (m.min_args, m.max_args));
                let args: Vec<String> = args.iter().map(|a| self.node(a)).collect();
                format!(
                    "call(F, {:?}, {:?}, {}, {:?}, vec![{}], fn_{})?",
                    text,
                    name,
                    min,
                    max,
                    args.join(", "),
                    name
                )
            }
        }
    }

    fn test(&self, t: &Test) -> String {
        match t {
            Test::Compare { op, lhs, rhs, text } => format!(
                "compare(F, {:?}, {}, &{}, &{})?",
                text,
                cmp_variant(*op),
                self.node(lhs),
                self.node(rhs)
            ),
            Test::All(children) if children.is_empty() => "true".into(),
            Test::Any(children) if children.is_empty() => "false".into(),
            Test::All(children) => format!(
                "({})",
                children.iter().map(|c| self.test(c)).collect::<Vec<_>>().join(" && ")
            ),
            Test::Any(children) => format!(
                "({})",
                children.iter().map(|c| self.test(c)).collect::<Vec<_>>().join(" || ")
            ),
        }
    }

    // ──────────────────────────────────────────
    // Switch
    // ──────────────────────────────────────────

    /// Render a chain as a block expression. Arms are numbered in `arms`
    /// so the taken path can be replayed for `set_vars`.
    fn chain<'p>(&self, chain: &'p Chain, depth: usize, arms: &mut Vec<&'p [Assign]>) -> String {
        let pad = INDENT.repeat(depth + 1);
        let mut s = String::from("{\n");
        if let Some(subject) = &chain.subject {
            writeln!(s, "{}let subject = {};", pad, self.read(subject, false)).ok();
        }
        for (i, arm) in chain.arms.iter().enumerate() {
            let id = arms.len();
            arms.push(&arm.set_vars);
            let keyword = if i == 0 { "if" } else { "} else if" };
            writeln!(s, "{}{} {} {{", pad, keyword, self.test(&arm.test)).ok();
            writeln!(s, "{}{}path.push({});", pad, INDENT, id).ok();
            let value = self.outcome(&arm.outcome, depth + 1, arms);
            writeln!(s, "{}{}{}", pad, INDENT, value).ok();
        }
        let fallback = match &chain.default {
            Some(d) => self.outcome(d, depth + 1, arms),
            None => match &chain.subject {
                Some(subject) => format!(
                    "return Err(RuleError::NoMatch {{ formula: F, detail: format!(\"no clause matched {{}} = {{}} and there is no default\", {:?}, subject) }})",
                    subject
                ),
                None => "return Err(RuleError::NoMatch { formula: F, detail: \"no clause matched and there is no default\".to_string() })".into(),
            },
        };
        if chain.arms.is_empty() {
            writeln!(s, "{}{}", pad, fallback).ok();
        } else {
            writeln!(s, "{}}} else {{", pad).ok();
            writeln!(s, "{}{}{}", pad, INDENT, fallback).ok();
            writeln!(s, "{}}}", pad).ok();
        }
        write!(s, "{}}}", INDENT.repeat(depth)).ok();
        s
    }

    fn outcome<'p>(&self, o: &'p Outcome, depth: usize, arms: &mut Vec<&'p [Assign]>) -> String {
        match o {
            Outcome::Value(n) => self.node(n),
            Outcome::Chain(c) => self.chain(c, depth + 1, arms),
        }
    }

    // ──────────────────────────────────────────
    // Scoring
    // ──────────────────────────────────────────

    fn sum_rule<'p>(&mut self, rule: &'p SumRule, arms: &mut Vec<&'p [Assign]>) {
        self.line(2, "{");
        if let Some(subject) = &rule.subject {
            let read = self.read(subject, false);
            self.line(3, &format!("let _ = {};", read));
        }
        for (i, range) in rule.ranges.iter().enumerate() {
            let id = arms.len();
            arms.push(&range.set_vars);
            let keyword = if i == 0 { "if" } else { "} else if" };
            let test = self.test(&range.test);
            self.line(3, &format!("{} {} {{", keyword, test));
            self.line(4, &format!("total += {:?}_f64;", range.contribution));
            self.line(4, &format!("path.push({});", id));
        }
        if !rule.ranges.is_empty() {
            self.line(3, "}");
        }
        self.line(2, "}");
    }

    fn tree(&mut self, unit: &Unit, tree: &Tree) {
        let mut leaves: Vec<&TreeLeaf> = Vec::new();
        let walk = self.tree_level(&tree.branches, &tree.dimensions, 0, 3, &mut leaves);
        self.line(2, "let reached: Result<u32, String> = 'tree: {");
        self.out.push_str(&walk);
        self.line(2, "};");

        let fallback = match &tree.default {
            Some(leaf) => {
                leaves.push(leaf);
                format!("Err(_) => {},", leaves.len() - 1)
            }
            None => "Err(at) => return Err(RuleError::NoMatch { formula: F, detail: format!(\"no scoring branch matched {} and there is no default\", at) }),".into(),
        };
        self.line(2, "let leaf: u32 = match reached {");
        self.line(3, "Ok(i) => i,");
        self.line(3, &fallback);
        self.line(2, "};");

        self.line(2, "let (value, decision, level) = match leaf {");
        for (i, leaf) in leaves.iter().enumerate() {
            self.line(
                3,
                &format!(
                    "{} => ({}, {}, {}),",
                    i,
                    value_literal(&leaf.primary),
                    value_literal(&leaf.decision),
                    value_literal(&leaf.level)
                ),
            );
        }
        self.line(3, "_ => (Value::Null, Value::Null, Value::Null),");
        self.line(2, "};");
        self.bind_all(2, &unit.targets, "value");
        if let Some(name) = &unit.decision_output {
            self.bind(2, name, "decision");
        }
        if let Some(name) = &unit.level_output {
            self.bind(2, name, "level");
        }
        if leaves.iter().any(|l| !l.set_vars.is_empty()) {
            self.line(2, "match leaf {");
            for (i, leaf) in leaves.iter().enumerate() {
                if leaf.set_vars.is_empty() {
                    continue;
                }
                self.line(3, &format!("{} => {{", i));
                self.assigns(4, &leaf.set_vars);
                self.line(3, "}");
            }
            self.line(3, "_ => {}");
            self.line(2, "}");
        }
    }

    /// One tree level as a diverging block: every path ends in
    /// `break 'tree` with a leaf index or the point where matching stopped.
    fn tree_level<'p>(
        &self,
        branches: &'p [TreeBranch],
        dimensions: &[String],
        level: usize,
        depth: usize,
        leaves: &mut Vec<&'p TreeLeaf>,
    ) -> String {
        let pad = INDENT.repeat(depth);
        let Some(dimension) = dimensions.get(level) else {
            return format!("{}break 'tree Err(\"the tree ends before a leaf\".to_string())\n", pad);
        };
        let mut s = String::new();
        writeln!(s, "{}let d = {};", pad, self.read(dimension, false)).ok();
        let stop = format!(
            "break 'tree Err(format!(\"{{}} = {{}}\", {:?}, d))",
            dimension
        );
        if branches.is_empty() {
            writeln!(s, "{}{}", pad, stop).ok();
            return s;
        }
        for (i, branch) in branches.iter().enumerate() {
            let test = branch.test.as_ref().map_or_else(|| "true".to_string(), |t| self.test(t));
            let keyword = if i == 0 { "if" } else { "} else if" };
            writeln!(s, "{}{} {} {{", pad, keyword, test).ok();
            match &branch.node {
                TreeNode::Leaf(leaf) => {
                    leaves.push(leaf);
                    writeln!(s, "{}{}break 'tree Ok({})", pad, INDENT, leaves.len() - 1).ok();
                }
                TreeNode::Children(children) => {
                    let inner = self.tree_level(children, dimensions, level + 1, depth + 1, leaves);
                    s.push_str(&inner);
                }
            }
        }
        writeln!(s, "{}}} else {{", pad).ok();
        writeln!(s, "{}{}{}", pad, INDENT, stop).ok();
        writeln!(s, "{}}}", pad).ok();
        s
    }
}

fn value_literal(v: &Value) -> String {
    match v {
        Value::Number(n) => format!("Value::Number({:?}_f64)", n),
        Value::Str(s) => format!("Value::Str({:?}.to_string())", s),
        Value::Bool(b) => format!("Value::Bool({})", b),
        Value::Null => "Value::Null".into(),
        Value::List(items) => format!(
            "Value::List(vec![{}])",
            items.iter().map(value_literal).collect::<Vec<_>>().join(", ")
        ),
    }
}

fn op_variant(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "Op::Add",
        BinaryOp::Sub => "Op::Sub",
        BinaryOp::Mul => "Op::Mul",
        BinaryOp::Div => "Op::Div",
        BinaryOp::Mod => "Op::Mod",
        BinaryOp::Pow => "Op::Pow",
        BinaryOp::Compare(_) => "Op::Add",
    }
}

fn cmp_variant(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "Cmp::Eq",
        CompareOp::Ne => "Cmp::Ne",
        CompareOp::Gt => "Cmp::Gt",
        CompareOp::Gte => "Cmp::Gte",
        CompareOp::Lt => "Cmp::Lt",
        CompareOp::Lte => "Cmp::Lte",
        CompareOp::Between => "Cmp::Between",
        CompareOp::In => "Cmp::In",
        CompareOp::NotIn => "Cmp::NotIn",
        CompareOp::Contains => "Cmp::Contains",
        CompareOp::StartsWith => "Cmp::StartsWith",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_names_must_be_free_identifiers() {
        assert!(check_function_name("evaluate_rules").is_ok());
        assert!(check_function_name("_private").is_ok());
        for bad in ["", "1st", "two words", "fn", "match", "input", "fn_sqrt", "_"] {
            assert!(check_function_name(bad).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn literals_render_as_rust_expressions() {
        assert_eq!(value_literal(&Value::Number(2.0)), "Value::Number(2.0_f64)");
        assert_eq!(value_literal(&Value::Number(-0.5)), "Value::Number(-0.5_f64)");
        assert_eq!(
            value_literal(&Value::Str("say \"hi\"".into())),
            "Value::Str(\"say \\\"hi\\\"\".to_string())"
        );
        assert_eq!(
            value_literal(&Value::List(vec![Value::Bool(true), Value::Null])),
            "Value::List(vec![Value::Bool(true), Value::Null])"
        );
    }

    #[test]
    fn slot_names_are_sanitized_and_unique() {
        let names: BTreeSet<String> = ["a-b", "a_b", "x"].iter().map(|s| s.to_string()).collect();
        let slots = Slots::new(names);
        assert_eq!(slots.get("a-b"), Some("v_a_b"));
        assert_eq!(slots.get("a_b"), Some("v_a_b_2"));
        assert_eq!(slots.get("x"), Some("v_x"));
    }
}
