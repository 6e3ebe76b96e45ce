/// Expression AST produced by the parser.
/// Precedence is encoded in the tree shape at parse time; evaluators never
/// re-derive it. Parenthesised sub-expressions are kept as `Group` nodes so
/// that `Display` reproduces the source structure in diagnostics.
use std::fmt;

/// Strip the `$` intermediate-variable sigil from a name.
pub fn strip_sigil(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

/// A constant value appearing in a document or expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    List(Vec<Literal>),
}

impl Literal {
    /// Convert a JSON value into a literal. Objects have no literal form.
    pub fn from_json(v: &serde_json::Value) -> Option<Literal> {
        match v {
            serde_json::Value::Null => Some(Literal::Null),
            serde_json::Value::Bool(b) => Some(Literal::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Literal::Number),
            serde_json::Value::String(s) => Some(Literal::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Literal::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Literal::List),
            serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write_number(f, *n),
            Literal::Str(s) => write_quoted(f, s),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Null => f.write_str("null"),
            Literal::List(items) => {
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

/// Comparison operators shared by expressions and condition leaves.
///
/// The expression grammar only produces the six relational operators;
/// the remaining ones appear in condition leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    In,
    NotIn,
    Contains,
    StartsWith,
}

impl CompareOp {
    /// Parse an operator name as written in a condition leaf.
    pub fn from_name(name: &str) -> Option<CompareOp> {
        let op = match name {
            "eq" | "==" => CompareOp::Eq,
            "ne" | "!=" => CompareOp::Ne,
            "gt" | ">" => CompareOp::Gt,
            "gte" | ">=" => CompareOp::Gte,
            "lt" | "<" => CompareOp::Lt,
            "lte" | "<=" => CompareOp::Lte,
            "between" => CompareOp::Between,
            "in" => CompareOp::In,
            "not_in" => CompareOp::NotIn,
            "contains" => CompareOp::Contains,
            "starts_with" => CompareOp::StartsWith,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
            CompareOp::Between => "between",
            CompareOp::In => "in",
            CompareOp::NotIn => "not_in",
            CompareOp::Contains => "contains",
            CompareOp::StartsWith => "starts_with",
        }
    }

    /// Infix symbol for relational operators, the leaf name otherwise.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            other => other.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Compare(CompareOp),
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Compare(op) => op.symbol(),
        }
    }

    pub fn is_arithmetic(self) -> bool {
        !matches!(self, BinaryOp::Compare(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    /// Variable reference. `name` is stored without the `$` sigil;
    /// `intermediate` records whether the sigil was written.
    Var {
        name: String,
        intermediate: bool,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Group(Box<Expr>),
}

impl Expr {
    /// Build a variable reference from a name as written (sigil optional).
    pub fn var(name: &str) -> Expr {
        Expr::Var {
            name: strip_sigil(name).to_owned(),
            intermediate: name.starts_with('$'),
        }
    }

    /// Variables referenced anywhere in the tree, de-prefixed, in first
    /// appearance order, without duplicates.
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            Expr::Var { name, .. } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Expr::Unary { operand, .. } | Expr::Group(operand) => operand.collect_vars(out),
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_vars(out);
                }
            }
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null => {}
        }
    }

    /// Intermediate (`$`-prefixed) references, de-prefixed.
    pub fn intermediate_refs(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Var {
                name,
                intermediate: true,
            } = e
            {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }

    /// Function names called anywhere in the tree, without duplicates.
    pub fn functions(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Call { name, .. } = e {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }

    /// Pre-order traversal.
    pub fn walk(&self, visit: &mut dyn FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Unary { operand, .. } | Expr::Group(operand) => operand.walk(visit),
            Expr::Call { args, .. } => {
                for a in args {
                    a.walk(visit);
                }
            }
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::Var { .. } => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write_number(f, *n),
            Expr::Str(s) => write_quoted(f, s),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Null => f.write_str("null"),
            Expr::Var { name, intermediate } => {
                if *intermediate {
                    write!(f, "${}", name)
                } else {
                    f.write_str(name)
                }
            }
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op.symbol(), rhs),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => write!(f, "-{}", operand),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                f.write_str(")")
            }
            Expr::Group(inner) => write!(f, "({})", inner),
        }
    }
}

/// Very large and very small magnitudes print in exponent form, which the
/// lexer reads back.
fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    let magnitude = n.abs();
    if magnitude != 0.0 && !(1e-6..1e16).contains(&magnitude) {
        write!(f, "{:e}", n)
    } else {
        write!(f, "{}", n)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            other => write!(f, "{}", other)?,
        }
    }
    f.write_str("\"")
}
