//! Rule document model and its JSON deserialization.
//!
//! A document is a list of formulas. Each formula's kind is decided by
//! which kind-defining field is present (`formula`, `switch`/`when`,
//! `scoring`) and converted into the exhaustive [`FormulaKind`] union;
//! documents declaring more than one kind on a formula are rejected.
//!
//! Parsing walks the JSON by hand (field presence matters, e.g. an
//! explicit `"default": null` differs from no default) and reports
//! problems with a dotted path such as `when[2].if.and[0]`.

use std::fmt;

use serde_json::{Map, Value as Json};

use crate::ast::{strip_sigil, BinaryOp, CompareOp, Expr, Literal};
use crate::error::{ConfigError, ParseError};
use crate::parser::{parse_expression, parse_subject_comparison};

// ──────────────────────────────────────────────
// Model
// ──────────────────────────────────────────────

/// A parsed rule document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Option<String>,
    pub formulas: Vec<Formula>,
}

/// One named unit producing a primary output plus optional side variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    /// Formula id, `$` sigil stripped.
    pub id: String,
    /// `as` alias, `$` sigil stripped; `None` when absent or equal to `id`.
    pub alias: Option<String>,
    /// Declared inputs, `$` sigil stripped.
    pub inputs: Vec<String>,
    pub kind: FormulaKind,
    /// Declaration index within the document.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaKind {
    Expression(ExpressionFormula),
    Switch(Switch),
    Accumulative(AccumulativeScoring),
    MultiDimensional(MultiDimensionalScoring),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionFormula {
    pub source: String,
    pub expr: Expr,
}

/// Ordered `when` clauses over an optional subject variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub subject: Option<String>,
    pub clauses: Vec<WhenClause>,
    pub default: Option<ClauseResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub condition: Condition,
    pub result: ClauseResult,
    pub set_vars: Vec<Assignment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseResult {
    Literal(Literal),
    Expr(Expr),
    Switch(Box<Switch>),
}

/// One `set_vars` entry, applied in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Operand,
}

/// A value-producing operand of a condition leaf or assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The subject of the enclosing switch, scoring rule or tree level.
    Subject,
    Literal(Literal),
    Expr(Expr),
    /// A list with at least one `$name` element, resolved per element.
    List(Vec<Operand>),
}

impl Operand {
    pub fn expr(&self) -> Option<&Expr> {
        match self {
            Operand::Expr(e) => Some(e),
            _ => None,
        }
    }

    pub fn visit_exprs(&self, visit: &mut dyn FnMut(&Expr)) {
        match self {
            Operand::Expr(e) => visit(e),
            Operand::List(items) => items.iter().for_each(|i| i.visit_exprs(visit)),
            Operand::Subject | Operand::Literal(_) => {}
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Subject => f.write_str("<subject>"),
            Operand::Literal(lit) => write!(f, "{}", lit),
            Operand::Expr(e) => write!(f, "{}", e),
            Operand::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Comparison {
        op: CompareOp,
        left: Operand,
        right: Operand,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulativeScoring {
    pub rules: Vec<ScoringRule>,
}

/// A per-variable scoring rule; the first matching range wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRule {
    pub subject: Option<String>,
    pub ranges: Vec<ScoreRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRange {
    pub condition: Condition,
    pub score: f64,
    pub weight: f64,
    pub set_vars: Vec<Assignment>,
}

impl ScoreRange {
    /// The amount this range adds to the total when it matches.
    pub fn contribution(&self) -> f64 {
        self.score * self.weight
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiDimensionalScoring {
    pub dimensions: Vec<String>,
    pub tree: Vec<ScoreBranch>,
    /// Leaf used when a level has no matching branch. Without one, such a
    /// run fails with a no-match error.
    pub default: Option<ScoreLeaf>,
}

/// A branch of a scoring tree. A branch without condition always matches.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBranch {
    pub condition: Option<Condition>,
    pub node: ScoreNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreNode {
    Children(Vec<ScoreBranch>),
    Leaf(ScoreLeaf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreLeaf {
    pub score: Option<f64>,
    pub decision: Option<Literal>,
    pub level: Option<Literal>,
    pub set_vars: Vec<Assignment>,
}

impl ScoreLeaf {
    /// Primary value: score, else decision, else level, else null.
    pub fn primary(&self) -> Literal {
        if let Some(s) = self.score {
            return Literal::Number(s);
        }
        self.decision
            .clone()
            .or_else(|| self.level.clone())
            .unwrap_or(Literal::Null)
    }
}

impl MultiDimensionalScoring {
    fn leaves(&self) -> Vec<&ScoreLeaf> {
        fn walk<'a>(branches: &'a [ScoreBranch], out: &mut Vec<&'a ScoreLeaf>) {
            for b in branches {
                match &b.node {
                    ScoreNode::Children(children) => walk(children, out),
                    ScoreNode::Leaf(leaf) => out.push(leaf),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.tree, &mut out);
        if let Some(d) = &self.default {
            out.push(d);
        }
        out
    }

    pub fn has_decision(&self) -> bool {
        self.leaves().iter().any(|l| l.decision.is_some())
    }

    pub fn has_level(&self) -> bool {
        self.leaves().iter().any(|l| l.level.is_some())
    }
}

// ──────────────────────────────────────────────
// Static analysis helpers
// ──────────────────────────────────────────────

impl Formula {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FormulaKind::Expression(_) => "expression",
            FormulaKind::Switch(_) => "switch",
            FormulaKind::Accumulative(_) => "scoring-accumulative",
            FormulaKind::MultiDimensional(_) => "scoring-multidimensional",
        }
    }

    /// Name of the `<id>_decision` side output of a multi-dimensional formula.
    pub fn decision_output(&self) -> String {
        format!("{}_decision", self.id)
    }

    /// Name of the `<id>_level` side output of a multi-dimensional formula.
    pub fn level_output(&self) -> String {
        format!("{}_level", self.id)
    }

    /// Names receiving the primary value: the id, then the alias.
    pub fn primary_targets(&self) -> Vec<String> {
        let mut out = vec![self.id.clone()];
        if let Some(a) = &self.alias {
            out.push(a.clone());
        }
        out
    }

    /// Every name this formula may write.
    pub fn writes(&self) -> Vec<String> {
        let mut out = self.primary_targets();
        if let FormulaKind::MultiDimensional(m) = &self.kind {
            if m.has_decision() {
                push_unique(&mut out, self.decision_output());
            }
            if m.has_level() {
                push_unique(&mut out, self.level_output());
            }
        }
        self.visit_assignments(&mut |a| push_unique(&mut out, a.name.clone()));
        out
    }

    /// Names that must be bound before the formula starts: declared
    /// inputs, switch subjects, scoring rule variables and dimensions.
    pub fn declared_reads(&self) -> Vec<String> {
        let mut out = Vec::new();
        for i in &self.inputs {
            push_unique(&mut out, i.clone());
        }
        match &self.kind {
            FormulaKind::Expression(_) => {}
            FormulaKind::Switch(s) => {
                if let Some(subject) = &s.subject {
                    push_unique(&mut out, subject.clone());
                }
            }
            FormulaKind::Accumulative(a) => {
                for r in &a.rules {
                    if let Some(subject) = &r.subject {
                        push_unique(&mut out, subject.clone());
                    }
                }
            }
            FormulaKind::MultiDimensional(m) => {
                for d in &m.dimensions {
                    push_unique(&mut out, d.clone());
                }
            }
        }
        out
    }

    /// Every variable the formula may read: declared inputs plus
    /// [`Formula::body_variables`].
    pub fn referenced_variables(&self) -> Vec<String> {
        let mut out = self.inputs.clone();
        for v in self.body_variables() {
            push_unique(&mut out, v);
        }
        out
    }

    /// Variables read by the formula body: subjects, dimensions, nested
    /// switch subjects and all variables inside its expressions.
    pub fn body_variables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        match &self.kind {
            FormulaKind::Expression(_) => {}
            FormulaKind::Switch(s) => {
                s.visit_subjects(&mut |name| push_unique(&mut out, name.to_owned()))
            }
            FormulaKind::Accumulative(a) => {
                for subject in a.rules.iter().filter_map(|r| r.subject.as_ref()) {
                    push_unique(&mut out, subject.clone());
                }
            }
            FormulaKind::MultiDimensional(m) => {
                for d in &m.dimensions {
                    push_unique(&mut out, d.clone());
                }
            }
        }
        self.visit_exprs(&mut |e| {
            for v in e.variables() {
                push_unique(&mut out, v);
            }
        });
        out
    }

    /// Function names called anywhere in the formula.
    pub fn functions(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit_exprs(&mut |e| {
            for f in e.functions() {
                push_unique(&mut out, f);
            }
        });
        out
    }

    /// Visit every expression in the formula (conditions, results,
    /// set_vars values), outermost first.
    pub fn visit_exprs(&self, visit: &mut dyn FnMut(&Expr)) {
        match &self.kind {
            FormulaKind::Expression(e) => visit(&e.expr),
            FormulaKind::Switch(s) => s.visit_exprs(visit),
            FormulaKind::Accumulative(a) => {
                for r in &a.rules {
                    for range in &r.ranges {
                        range.condition.visit_exprs(visit);
                        visit_assignment_exprs(&range.set_vars, visit);
                    }
                }
            }
            FormulaKind::MultiDimensional(m) => {
                fn walk(branches: &[ScoreBranch], visit: &mut dyn FnMut(&Expr)) {
                    for b in branches {
                        if let Some(c) = &b.condition {
                            c.visit_exprs(visit);
                        }
                        match &b.node {
                            ScoreNode::Children(children) => walk(children, visit),
                            ScoreNode::Leaf(leaf) => visit_assignment_exprs(&leaf.set_vars, visit),
                        }
                    }
                }
                walk(&m.tree, visit);
                if let Some(d) = &m.default {
                    visit_assignment_exprs(&d.set_vars, visit);
                }
            }
        }
    }

    /// Visit every `set_vars` entry in the formula.
    pub fn visit_assignments(&self, visit: &mut dyn FnMut(&Assignment)) {
        match &self.kind {
            FormulaKind::Expression(_) => {}
            FormulaKind::Switch(s) => s.visit_assignments(visit),
            FormulaKind::Accumulative(a) => {
                for r in &a.rules {
                    for range in &r.ranges {
                        for assignment in &range.set_vars {
                            visit(assignment);
                        }
                    }
                }
            }
            FormulaKind::MultiDimensional(m) => {
                for leaf in m.leaves() {
                    for assignment in &leaf.set_vars {
                        visit(assignment);
                    }
                }
            }
        }
    }
}

impl Switch {
    pub fn visit_exprs(&self, visit: &mut dyn FnMut(&Expr)) {
        for c in &self.clauses {
            c.condition.visit_exprs(visit);
            c.result.visit_exprs(visit);
            visit_assignment_exprs(&c.set_vars, visit);
        }
        if let Some(d) = &self.default {
            d.visit_exprs(visit);
        }
    }

    pub fn visit_assignments(&self, visit: &mut dyn FnMut(&Assignment)) {
        for c in &self.clauses {
            for assignment in &c.set_vars {
                visit(assignment);
            }
            if let ClauseResult::Switch(inner) = &c.result {
                inner.visit_assignments(visit);
            }
        }
        if let Some(ClauseResult::Switch(inner)) = &self.default {
            inner.visit_assignments(visit);
        }
    }

    /// Subjects of this switch and every nested switch.
    pub fn visit_subjects(&self, visit: &mut dyn FnMut(&str)) {
        if let Some(s) = &self.subject {
            visit(s);
        }
        for c in &self.clauses {
            if let ClauseResult::Switch(inner) = &c.result {
                inner.visit_subjects(visit);
            }
        }
        if let Some(ClauseResult::Switch(inner)) = &self.default {
            inner.visit_subjects(visit);
        }
    }
}

impl ClauseResult {
    fn visit_exprs(&self, visit: &mut dyn FnMut(&Expr)) {
        match self {
            ClauseResult::Literal(_) => {}
            ClauseResult::Expr(e) => visit(e),
            ClauseResult::Switch(s) => s.visit_exprs(visit),
        }
    }
}

impl Condition {
    pub fn visit_exprs(&self, visit: &mut dyn FnMut(&Expr)) {
        match self {
            Condition::Comparison { left, right, .. } => {
                left.visit_exprs(visit);
                right.visit_exprs(visit);
            }
            Condition::And(children) | Condition::Or(children) => {
                for c in children {
                    c.visit_exprs(visit);
                }
            }
        }
    }
}

fn visit_assignment_exprs(set_vars: &[Assignment], visit: &mut dyn FnMut(&Expr)) {
    for a in set_vars {
        a.value.visit_exprs(visit);
    }
}

fn push_unique(out: &mut Vec<String>, name: String) {
    if !out.contains(&name) {
        out.push(name);
    }
}

// ──────────────────────────────────────────────
// Deserialization
// ──────────────────────────────────────────────

/// Result of parsing every formula independently, keeping going past
/// failures so that the validator can report all of them.
#[derive(Debug, Clone)]
pub struct LenientParse {
    pub id: Option<String>,
    pub formulas: Vec<Formula>,
    pub errors: Vec<ConfigError>,
}

impl Document {
    /// Parse a rule document. A single problem is returned as itself;
    /// several are aggregated into [`ConfigError::Invalid`].
    pub fn from_json(v: &Json) -> Result<Document, ConfigError> {
        let parsed = parse_lenient(v)?;
        match ConfigError::aggregate(parsed.errors) {
            Some(e) => Err(e),
            None => Ok(Document {
                id: parsed.id,
                formulas: parsed.formulas,
            }),
        }
    }
}

/// Parse every formula of a document, collecting per-formula errors.
///
/// Fails only when the top-level shape is wrong.
pub fn parse_lenient(v: &Json) -> Result<LenientParse, ConfigError> {
    let (id, items) = match v {
        Json::Array(items) => (None, items),
        Json::Object(obj) => {
            let items = obj
                .get("formulas")
                .and_then(|f| f.as_array())
                .ok_or(ConfigError::NotADocument)?;
            let id = obj.get("id").and_then(|i| i.as_str()).map(str::to_owned);
            (id, items)
        }
        _ => return Err(ConfigError::NotADocument),
    };

    let mut formulas = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match parse_formula(index, item) {
            Ok(f) => formulas.push(f),
            Err(e) => errors.push(e),
        }
    }
    Ok(LenientParse {
        id,
        formulas,
        errors,
    })
}

/// Error context for one formula.
#[derive(Clone, Copy)]
struct Cx<'a> {
    id: &'a str,
}

impl Cx<'_> {
    fn invalid(&self, path: &str, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidField {
            id: self.id.to_owned(),
            path: path.to_owned(),
            message: message.into(),
        }
    }

    fn malformed(&self, path: &str, message: impl Into<String>) -> ConfigError {
        ConfigError::MalformedRange {
            id: self.id.to_owned(),
            path: path.to_owned(),
            message: message.into(),
        }
    }

    fn parse_err(&self, path: &str, source: ParseError) -> ConfigError {
        ConfigError::Parse {
            id: self.id.to_owned(),
            path: path.to_owned(),
            source,
        }
    }

    fn expr(&self, path: &str, src: &str) -> Result<Expr, ConfigError> {
        parse_expression(src).map_err(|e| self.parse_err(path, e))
    }
}

fn join(prefix: &str, field: &str) -> String {
    format!("{}{}", prefix, field)
}

/// Kind-defining fields, grouped by the kind they select.
const KIND_MARKERS: &[(&str, &[&str])] = &[
    ("expression", &["formula"]),
    ("switch", &["switch", "when"]),
    ("scoring", &["scoring"]),
];

fn parse_formula(index: usize, v: &Json) -> Result<Formula, ConfigError> {
    let obj = v.as_object().ok_or(ConfigError::MissingId { index })?;
    let id = obj
        .get("id")
        .and_then(|i| i.as_str())
        .map(strip_sigil)
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingId { index })?
        .to_owned();
    let cx = Cx { id: &id };

    let alias = match obj.get("as") {
        None | Some(Json::Null) => None,
        Some(Json::String(s)) => {
            let a = strip_sigil(s);
            if a.is_empty() {
                return Err(cx.invalid("as", "alias must not be empty"));
            }
            (a != id).then(|| a.to_owned())
        }
        Some(_) => return Err(cx.invalid("as", "must be a string")),
    };

    let inputs = parse_name_list(cx, obj.get("inputs"), "inputs")?;

    let mut present: Vec<(&str, &str)> = Vec::new();
    for (kind, markers) in KIND_MARKERS {
        if let Some(m) = markers.iter().find(|m| obj.contains_key(**m)) {
            present.push((*kind, *m));
        }
    }
    if present.len() > 1 {
        return Err(ConfigError::AmbiguousKind {
            id: id.clone(),
            first: present[0].1.to_owned(),
            second: present[1].1.to_owned(),
        });
    }
    let kind = match present.first().map(|(k, _)| *k) {
        Some("expression") => {
            let src = obj
                .get("formula")
                .and_then(|f| f.as_str())
                .ok_or_else(|| cx.invalid("formula", "must be an expression string"))?;
            FormulaKind::Expression(ExpressionFormula {
                source: src.to_owned(),
                expr: cx.expr("formula", src)?,
            })
        }
        Some("switch") => FormulaKind::Switch(parse_switch(cx, obj, "")?),
        Some(_) => parse_scoring(cx, obj.get("scoring"))?,
        None => return Err(ConfigError::UnknownKind { id: id.clone() }),
    };

    Ok(Formula {
        id,
        alias,
        inputs,
        kind,
        position: index,
    })
}

fn parse_name_list(cx: Cx<'_>, v: Option<&Json>, path: &str) -> Result<Vec<String>, ConfigError> {
    let arr = match v {
        None | Some(Json::Null) => return Ok(Vec::new()),
        Some(Json::Array(arr)) => arr,
        Some(_) => return Err(cx.invalid(path, "must be an array of names")),
    };
    let mut out = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let name = item
            .as_str()
            .map(strip_sigil)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| cx.invalid(&format!("{}[{}]", path, i), "must be a non-empty name"))?;
        push_unique(&mut out, name.to_owned());
    }
    Ok(out)
}

fn parse_subject(cx: Cx<'_>, v: Option<&Json>, path: &str) -> Result<Option<String>, ConfigError> {
    match v {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) if !strip_sigil(s).is_empty() => Ok(Some(strip_sigil(s).to_owned())),
        Some(_) => Err(cx.invalid(path, "must be a variable name")),
    }
}

fn parse_switch(cx: Cx<'_>, obj: &Map<String, Json>, prefix: &str) -> Result<Switch, ConfigError> {
    let subject = parse_subject(cx, obj.get("switch"), &join(prefix, "switch"))?;
    let when_path = join(prefix, "when");
    let when = match obj.get("when") {
        None => &[][..],
        Some(Json::Array(arr)) => &arr[..],
        Some(_) => return Err(cx.invalid(&when_path, "must be an array of clauses")),
    };

    let mut clauses = Vec::with_capacity(when.len());
    for (i, c) in when.iter().enumerate() {
        let path = format!("{}[{}]", when_path, i);
        clauses.push(parse_clause(cx, c, &path, subject.is_some())?);
    }

    let default = match obj.get("default") {
        None => None,
        Some(d) => Some(parse_result(cx, d, &join(prefix, "default"))?),
    };

    if clauses.is_empty() && default.is_none() {
        return Err(cx.invalid(&when_path, "a switch needs at least one clause or a default"));
    }

    Ok(Switch {
        subject,
        clauses,
        default,
    })
}

fn parse_clause(cx: Cx<'_>, v: &Json, path: &str, has_subject: bool) -> Result<WhenClause, ConfigError> {
    let obj = v
        .as_object()
        .ok_or_else(|| cx.invalid(path, "clause must be an object"))?;
    let cond_path = format!("{}.if", path);
    let condition = obj
        .get("if")
        .ok_or_else(|| cx.invalid(path, "clause is missing 'if'"))
        .and_then(|c| parse_condition(cx, c, &cond_path, has_subject))?;
    let result_path = format!("{}.result", path);
    let result = obj
        .get("result")
        .ok_or_else(|| cx.invalid(path, "clause is missing 'result'"))
        .and_then(|r| parse_result(cx, r, &result_path))?;
    let set_vars = parse_set_vars(cx, obj.get("set_vars"), &format!("{}.set_vars", path))?;
    Ok(WhenClause {
        condition,
        result,
        set_vars,
    })
}

fn parse_result(cx: Cx<'_>, v: &Json, path: &str) -> Result<ClauseResult, ConfigError> {
    match v {
        Json::Object(obj) => {
            if let Some(f) = obj.get("formula") {
                let src = f
                    .as_str()
                    .ok_or_else(|| cx.invalid(&format!("{}.formula", path), "must be a string"))?;
                return Ok(ClauseResult::Expr(cx.expr(&format!("{}.formula", path), src)?));
            }
            if obj.contains_key("when") || obj.contains_key("switch") {
                let nested = parse_switch(cx, obj, &format!("{}.", path))?;
                return Ok(ClauseResult::Switch(Box::new(nested)));
            }
            Err(cx.invalid(
                path,
                "result object must contain 'formula' or a nested 'when'",
            ))
        }
        other => Literal::from_json(other)
            .map(ClauseResult::Literal)
            .ok_or_else(|| cx.invalid(path, "unsupported result value")),
    }
}

fn parse_condition(
    cx: Cx<'_>,
    v: &Json,
    path: &str,
    has_subject: bool,
) -> Result<Condition, ConfigError> {
    match v {
        Json::String(s) => parse_condition_str(cx, s, path, has_subject),
        Json::Bool(b) => Ok(Condition::Comparison {
            op: CompareOp::Eq,
            left: Operand::Literal(Literal::Bool(*b)),
            right: Operand::Literal(Literal::Bool(true)),
        }),
        Json::Object(obj) => {
            let and = obj.get("and");
            let or = obj.get("or");
            match (and, or) {
                (Some(_), Some(_)) => Err(cx.invalid(path, "a condition cannot have both 'and' and 'or'")),
                (Some(children), None) => Ok(Condition::And(parse_children(
                    cx,
                    children,
                    &format!("{}.and", path),
                    has_subject,
                )?)),
                (None, Some(children)) => Ok(Condition::Or(parse_children(
                    cx,
                    children,
                    &format!("{}.or", path),
                    has_subject,
                )?)),
                (None, None) => parse_leaf(cx, obj, path, has_subject),
            }
        }
        _ => Err(cx.invalid(path, "condition must be an object, string or boolean")),
    }
}

fn parse_children(
    cx: Cx<'_>,
    v: &Json,
    path: &str,
    has_subject: bool,
) -> Result<Vec<Condition>, ConfigError> {
    let arr = v
        .as_array()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| cx.invalid(path, "must be a non-empty array of conditions"))?;
    arr.iter()
        .enumerate()
        .map(|(i, c)| parse_condition(cx, c, &format!("{}[{}]", path, i), has_subject))
        .collect()
}

fn parse_condition_str(
    cx: Cx<'_>,
    s: &str,
    path: &str,
    has_subject: bool,
) -> Result<Condition, ConfigError> {
    if let Some((op, rhs)) = parse_subject_comparison(s).map_err(|e| cx.parse_err(path, e))? {
        if !has_subject {
            return Err(cx.invalid(
                path,
                format!("shorthand '{}' needs a switch subject", s.trim()),
            ));
        }
        return Ok(Condition::Comparison {
            op,
            left: Operand::Subject,
            right: Operand::Expr(rhs),
        });
    }
    match cx.expr(path, s)? {
        Expr::Binary {
            op: BinaryOp::Compare(op),
            lhs,
            rhs,
        } => Ok(Condition::Comparison {
            op,
            left: Operand::Expr(*lhs),
            right: Operand::Expr(*rhs),
        }),
        other => Ok(Condition::Comparison {
            op: CompareOp::Eq,
            left: Operand::Expr(other),
            right: Operand::Literal(Literal::Bool(true)),
        }),
    }
}

fn parse_leaf(
    cx: Cx<'_>,
    obj: &Map<String, Json>,
    path: &str,
    has_subject: bool,
) -> Result<Condition, ConfigError> {
    let op_name = obj
        .get("op")
        .and_then(|o| o.as_str())
        .ok_or_else(|| cx.invalid(path, "condition leaf is missing 'op'"))?;
    let op = CompareOp::from_name(op_name)
        .ok_or_else(|| cx.invalid(path, format!("unknown operator '{}'", op_name)))?;

    let left = match obj.get("var") {
        None | Some(Json::Null) if has_subject => Operand::Subject,
        None | Some(Json::Null) => {
            return Err(cx.invalid(
                path,
                "condition has no 'var' and there is no switch subject",
            ))
        }
        Some(Json::String(raw)) if !strip_sigil(raw).is_empty() => Operand::Expr(Expr::var(raw)),
        Some(_) => return Err(cx.invalid(&format!("{}.var", path), "must be a variable name")),
    };

    let value_path = format!("{}.value", path);
    let raw = obj
        .get("value")
        .ok_or_else(|| cx.invalid(path, "condition leaf is missing 'value'"))?;
    let right = parse_value_operand(cx, raw, &value_path)?;

    let list_len = match &right {
        Operand::Literal(Literal::List(items)) => Some(items.len()),
        Operand::List(items) => Some(items.len()),
        _ => None,
    };
    // A `$name` value is checked when evaluated.
    if !matches!(right, Operand::Expr(_)) {
        match (op, list_len) {
            (CompareOp::Between, Some(2)) => {}
            (CompareOp::Between, _) => {
                return Err(cx.malformed(&value_path, "between requires exactly two bounds"))
            }
            (CompareOp::In | CompareOp::NotIn, Some(_)) => {}
            (CompareOp::In | CompareOp::NotIn, None) => {
                return Err(cx.invalid(
                    &value_path,
                    format!("'{}' requires a list of values", op.name()),
                ))
            }
            _ => {}
        }
    }

    Ok(Condition::Comparison { op, left, right })
}

/// A leaf `value`: a `$name` string refers to a variable, anything else is
/// a literal. List elements follow the same rule.
fn parse_value_operand(cx: Cx<'_>, v: &Json, path: &str) -> Result<Operand, ConfigError> {
    match v {
        Json::String(s) if s.starts_with('$') => {
            if let Ok(e @ Expr::Var { .. }) = parse_expression(s) {
                return Ok(Operand::Expr(e));
            }
        }
        Json::Array(items) => {
            let operands = items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_value_operand(cx, item, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()?;
            if operands.iter().any(|o| !matches!(o, Operand::Literal(_))) {
                return Ok(Operand::List(operands));
            }
        }
        _ => {}
    }
    Literal::from_json(v)
        .map(Operand::Literal)
        .ok_or_else(|| cx.invalid(path, "value must be a literal or a $variable"))
}

fn parse_set_vars(cx: Cx<'_>, v: Option<&Json>, path: &str) -> Result<Vec<Assignment>, ConfigError> {
    let map = match v {
        None | Some(Json::Null) => return Ok(Vec::new()),
        Some(Json::Object(map)) => map,
        Some(_) => return Err(cx.invalid(path, "must be an object")),
    };
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        let name = strip_sigil(key);
        let key_path = format!("{}.{}", path, key);
        if name.is_empty() {
            return Err(cx.invalid(&key_path, "variable name must not be empty"));
        }
        let value = match value {
            Json::String(src) => Operand::Expr(cx.expr(&key_path, src)?),
            other => Literal::from_json(other)
                .map(Operand::Literal)
                .ok_or_else(|| cx.invalid(&key_path, "must be an expression string or literal"))?,
        };
        out.push(Assignment {
            name: name.to_owned(),
            value,
        });
    }
    Ok(out)
}

fn parse_scoring(cx: Cx<'_>, v: Option<&Json>) -> Result<FormulaKind, ConfigError> {
    let obj = v
        .and_then(|s| s.as_object())
        .ok_or_else(|| cx.invalid("scoring", "must be an object"))?;
    let has_rules = obj.contains_key("rules");
    let tree_marker = ["dimensions", "tree"]
        .into_iter()
        .find(|k| obj.contains_key(*k));
    match (has_rules, tree_marker) {
        (true, Some(marker)) => Err(ConfigError::AmbiguousKind {
            id: cx.id.to_owned(),
            first: "scoring.rules".to_owned(),
            second: format!("scoring.{}", marker),
        }),
        (true, None) => parse_accumulative(cx, obj).map(FormulaKind::Accumulative),
        (false, Some(_)) => parse_multidimensional(cx, obj).map(FormulaKind::MultiDimensional),
        (false, None) => Err(cx.invalid(
            "scoring",
            "expected 'rules' (accumulative) or 'dimensions' and 'tree' (multi-dimensional)",
        )),
    }
}

fn parse_accumulative(cx: Cx<'_>, obj: &Map<String, Json>) -> Result<AccumulativeScoring, ConfigError> {
    let rules = obj
        .get("rules")
        .and_then(|r| r.as_array())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| cx.invalid("scoring.rules", "must be a non-empty array"))?;

    let mut out = Vec::with_capacity(rules.len());
    for (i, rule) in rules.iter().enumerate() {
        let path = format!("scoring.rules[{}]", i);
        let robj = rule
            .as_object()
            .ok_or_else(|| cx.invalid(&path, "rule must be an object"))?;
        let subject = parse_subject(cx, robj.get("var"), &format!("{}.var", path))?;

        let ranges = match (robj.get("ranges"), robj.get("if")) {
            (Some(_), Some(_)) => {
                return Err(cx.malformed(&path, "a rule has either 'ranges' or a single 'if', not both"))
            }
            (Some(ranges), None) => {
                let arr = ranges
                    .as_array()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| cx.malformed(&format!("{}.ranges", path), "must be a non-empty array"))?;
                arr.iter()
                    .enumerate()
                    .map(|(j, r)| {
                        parse_range(cx, r, &format!("{}.ranges[{}]", path, j), subject.is_some())
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            (None, Some(_)) => vec![parse_range(cx, rule, &path, subject.is_some())?],
            (None, None) => {
                return Err(cx.malformed(&path, "a rule needs 'ranges' or an 'if'/'score' pair"))
            }
        };
        out.push(ScoringRule { subject, ranges });
    }
    Ok(AccumulativeScoring { rules: out })
}

fn parse_range(cx: Cx<'_>, v: &Json, path: &str, has_subject: bool) -> Result<ScoreRange, ConfigError> {
    let obj = v
        .as_object()
        .ok_or_else(|| cx.malformed(path, "range must be an object"))?;
    let condition = obj
        .get("if")
        .ok_or_else(|| cx.malformed(path, "range is missing 'if'"))
        .and_then(|c| parse_condition(cx, c, &format!("{}.if", path), has_subject))?;
    let score = obj
        .get("score")
        .or_else(|| obj.get("result"))
        .ok_or_else(|| cx.malformed(path, "range is missing 'score'"))?
        .as_f64()
        .ok_or_else(|| cx.malformed(&format!("{}.score", path), "score must be a number"))?;
    let weight = match obj.get("weight") {
        None | Some(Json::Null) => 1.0,
        Some(w) => w
            .as_f64()
            .ok_or_else(|| cx.malformed(&format!("{}.weight", path), "weight must be a number"))?,
    };
    let set_vars = parse_set_vars(cx, obj.get("set_vars"), &format!("{}.set_vars", path))?;
    Ok(ScoreRange {
        condition,
        score,
        weight,
        set_vars,
    })
}

fn parse_multidimensional(
    cx: Cx<'_>,
    obj: &Map<String, Json>,
) -> Result<MultiDimensionalScoring, ConfigError> {
    let dimensions = parse_name_list(cx, obj.get("dimensions"), "scoring.dimensions")?;
    if dimensions.is_empty() {
        return Err(cx.invalid("scoring.dimensions", "must list at least one variable"));
    }
    let tree = obj
        .get("tree")
        .ok_or_else(|| cx.invalid("scoring", "multi-dimensional scoring needs a 'tree'"))
        .and_then(|t| parse_branches(cx, t, "scoring.tree", 0, dimensions.len()))?;
    let default = match obj.get("default") {
        None | Some(Json::Null) => None,
        Some(d) => {
            let dobj = d
                .as_object()
                .ok_or_else(|| cx.malformed("scoring.default", "default must be a leaf object"))?;
            Some(parse_leaf_node(cx, dobj, "scoring.default")?)
        }
    };
    Ok(MultiDimensionalScoring {
        dimensions,
        tree,
        default,
    })
}

fn parse_branches(
    cx: Cx<'_>,
    v: &Json,
    path: &str,
    depth: usize,
    max_depth: usize,
) -> Result<Vec<ScoreBranch>, ConfigError> {
    let arr = v
        .as_array()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| cx.malformed(path, "must be a non-empty array of branches"))?;
    let mut out = Vec::with_capacity(arr.len());
    for (i, b) in arr.iter().enumerate() {
        let bpath = format!("{}[{}]", path, i);
        let obj = b
            .as_object()
            .ok_or_else(|| cx.malformed(&bpath, "branch must be an object"))?;
        let condition = match obj.get("if") {
            None | Some(Json::Null) => None,
            Some(c) => Some(parse_condition(cx, c, &format!("{}.if", bpath), true)?),
        };
        let node = match obj.get("children") {
            Some(children) => {
                if ["score", "decision", "level"].iter().any(|k| obj.contains_key(*k)) {
                    return Err(cx.malformed(&bpath, "branch has both 'children' and a leaf value"));
                }
                if depth + 1 >= max_depth {
                    return Err(cx.malformed(&bpath, "tree is deeper than the declared dimensions"));
                }
                ScoreNode::Children(parse_branches(
                    cx,
                    children,
                    &format!("{}.children", bpath),
                    depth + 1,
                    max_depth,
                )?)
            }
            None => ScoreNode::Leaf(parse_leaf_node(cx, obj, &bpath)?),
        };
        out.push(ScoreBranch { condition, node });
    }
    Ok(out)
}

fn parse_leaf_node(cx: Cx<'_>, obj: &Map<String, Json>, path: &str) -> Result<ScoreLeaf, ConfigError> {
    let score = match obj.get("score") {
        None | Some(Json::Null) => None,
        Some(s) => Some(
            s.as_f64()
                .ok_or_else(|| cx.malformed(&format!("{}.score", path), "score must be a number"))?,
        ),
    };
    let literal = |key: &str| -> Result<Option<Literal>, ConfigError> {
        match obj.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(v) => Literal::from_json(v)
                .map(Some)
                .ok_or_else(|| cx.malformed(&format!("{}.{}", path, key), "must be a literal")),
        }
    };
    let decision = literal("decision")?;
    let level = literal("level")?;
    if score.is_none() && decision.is_none() && level.is_none() {
        return Err(cx.malformed(path, "leaf needs a 'score', 'decision' or 'level'"));
    }
    let set_vars = parse_set_vars(cx, obj.get("set_vars"), &format!("{}.set_vars", path))?;
    Ok(ScoreLeaf {
        score,
        decision,
        level,
        set_vars,
    })
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
