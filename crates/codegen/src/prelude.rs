//! Runtime support copied into every generated module.
//!
//! The generated module depends on nothing but `std`, so the operator
//! semantics, error messages and built-in functions it uses are emitted
//! alongside the rules. They mirror `ruleform_eval::ops` and the built-in
//! registry one for one.

/// Items emitted once per module, after the header.
pub const PRELUDE: &str = r##"use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A value read from the inputs or computed by a rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
            Value::List(_) => "list",
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Null => false,
            Value::List(items) => !items.is_empty(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => f.write_str("null"),
            Value::List(items) => {
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

/// Failure of one evaluation. No partial results accompany it.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleError {
    MissingInput { formula: &'static str, name: &'static str, intermediate: bool },
    Evaluation { formula: &'static str, message: String, expr: &'static str },
    Type { formula: &'static str, message: String, expr: &'static str },
    NoMatch { formula: &'static str, detail: String },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::MissingInput { formula, name, intermediate } => {
                let label = if *intermediate { "intermediate variable" } else { "input" };
                write!(f, "formula '{}': missing {} '{}'", formula, label, name)
            }
            RuleError::Evaluation { formula, message, expr } => {
                write!(f, "formula '{}': {} in `{}`", formula, message, expr)
            }
            RuleError::Type { formula, message, expr } => {
                write!(f, "formula '{}': type error: {} in `{}`", formula, message, expr)
            }
            RuleError::NoMatch { formula, detail } => write!(f, "formula '{}': {}", formula, detail),
        }
    }
}

impl std::error::Error for RuleError {}

enum Fault {
    Type(String),
    Domain(String),
}

impl Fault {
    fn at(self, formula: &'static str, expr: &'static str) -> RuleError {
        match self {
            Fault::Type(message) => RuleError::Type { formula, message, expr },
            Fault::Domain(message) => RuleError::Evaluation { formula, message, expr },
        }
    }
}

fn input(inputs: &BTreeMap<String, Value>, name: &str) -> Option<Value> {
    inputs
        .get(name)
        .or_else(|| inputs.get(&format!("${}", name)))
        .cloned()
}

fn get(formula: &'static str, slot: &Option<Value>, name: &'static str) -> Result<Value, RuleError> {
    slot.clone().ok_or(RuleError::MissingInput { formula, name, intermediate: false })
}

fn get_ref(formula: &'static str, slot: &Option<Value>, name: &'static str) -> Result<Value, RuleError> {
    slot.clone().ok_or(RuleError::MissingInput { formula, name, intermediate: true })
}

fn neg(formula: &'static str, expr: &'static str, v: Value) -> Result<Value, RuleError> {
    match v {
        Value::Number(n) => Ok(Value::Number(-n)),
        other => Err(Fault::Type(format!("cannot negate {}", other.type_name())).at(formula, expr)),
    }
}

#[derive(Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Pow => "**",
        }
    }
}

fn arith(formula: &'static str, expr: &'static str, op: Op, l: Value, r: Value) -> Result<Value, RuleError> {
    let (a, b) = match (&l, &r) {
        (Value::Number(a), Value::Number(b)) => (*a, *b),
        _ => {
            let message = format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                l.type_name(),
                r.type_name()
            );
            return Err(Fault::Type(message).at(formula, expr));
        }
    };
    let n = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div if b == 0.0 => return Err(Fault::Domain("division by zero".into()).at(formula, expr)),
        Op::Div => a / b,
        Op::Mod if b == 0.0 => return Err(Fault::Domain("modulo by zero".into()).at(formula, expr)),
        Op::Mod => a % b,
        Op::Pow => a.powf(b),
    };
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        let message = format!("result of '{}' is not a finite number", op.symbol());
        Err(Fault::Domain(message).at(formula, expr))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Cmp {
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

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Result<Ordering, Fault> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .partial_cmp(y)
            .ok_or_else(|| Fault::Domain("cannot order non-finite numbers".into())),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => Err(Fault::Type(format!(
            "cannot order {} against {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn test(op: Cmp, l: &Value, r: &Value) -> Result<bool, Fault> {
    match op {
        Cmp::Eq => Ok(values_equal(l, r)),
        Cmp::Ne => Ok(!values_equal(l, r)),
        Cmp::Gt => Ok(ordering(l, r)? == Ordering::Greater),
        Cmp::Gte => Ok(ordering(l, r)? != Ordering::Less),
        Cmp::Lt => Ok(ordering(l, r)? == Ordering::Less),
        Cmp::Lte => Ok(ordering(l, r)? != Ordering::Greater),
        Cmp::Between => match r {
            Value::List(bounds) if bounds.len() == 2 => Ok(ordering(l, &bounds[0])? != Ordering::Less
                && ordering(l, &bounds[1])? != Ordering::Greater),
            Value::List(items) => Err(Fault::Type(format!(
                "'between' requires a list of two bounds, got a list of {}",
                items.len()
            ))),
            other => Err(Fault::Type(format!(
                "'between' requires a list of two bounds, got {}",
                other.type_name()
            ))),
        },
        Cmp::In | Cmp::NotIn => match r {
            Value::List(items) => {
                let found = items.iter().any(|item| values_equal(l, item));
                Ok(found == (op == Cmp::In))
            }
            other => Err(Fault::Type(format!(
                "'{}' requires a list, got {}",
                if op == Cmp::In { "in" } else { "not_in" },
                other.type_name()
            ))),
        },
        Cmp::Contains => match l {
            Value::List(items) => Ok(items.iter().any(|item| values_equal(item, r))),
            _ => Ok(l.to_string().contains(&r.to_string())),
        },
        Cmp::StartsWith => Ok(l.to_string().starts_with(&r.to_string())),
    }
}

fn compare(formula: &'static str, expr: &'static str, op: Cmp, l: &Value, r: &Value) -> Result<bool, RuleError> {
    test(op, l, r).map_err(|fault| fault.at(formula, expr))
}

type Builtin = fn(&[Value]) -> Result<Value, String>;

fn call(
    formula: &'static str,
    expr: &'static str,
    name: &'static str,
    min: usize,
    max: Option<usize>,
    args: Vec<Value>,
    function: Builtin,
) -> Result<Value, RuleError> {
    let got = args.len();
    if got < min || max.is_some_and(|max| got > max) {
        let expected = match max {
            Some(max) if max == min => format!("{}", max),
            Some(max) => format!("{} to {}", min, max),
            None => format!("at least {}", min),
        };
        let message = format!("{}() takes {} arguments, got {}", name, expected, got);
        return Err(Fault::Domain(message).at(formula, expr));
    }
    function(&args).map_err(|message| Fault::Domain(format!("{}(): {}", name, message)).at(formula, expr))
}

fn number(args: &[Value], i: usize) -> Result<f64, String> {
    match args.get(i) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(format!("argument {} must be a number, got {}", i + 1, other.type_name())),
        None => Err(format!("missing argument {}", i + 1)),
    }
}

fn optional_number(args: &[Value], i: usize) -> Result<Option<f64>, String> {
    match args.get(i) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => number(args, i).map(Some),
    }
}

fn numbers(args: &[Value]) -> Result<Vec<f64>, String> {
    fn push(v: &Value, out: &mut Vec<f64>) -> Result<(), String> {
        match v {
            Value::Number(n) => out.push(*n),
            Value::List(items) => {
                for item in items {
                    push(item, out)?;
                }
            }
            other => return Err(format!("expected numbers, got {}", other.type_name())),
        }
        Ok(())
    }
    let mut out = Vec::with_capacity(args.len());
    for a in args {
        push(a, &mut out)?;
    }
    Ok(out)
}

fn finite(n: f64) -> Result<Value, String> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err("result is not a finite number".into())
    }
}
"##;

/// Source of the helper implementing built-in `name`, as a function
/// `fn_<name>(&[Value]) -> Result<Value, String>`. `None` when the
/// function has no standalone translation.
pub fn builtin_source(name: &str) -> Option<&'static str> {
    let src = match name {
        // math
        "abs" => "fn fn_abs(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Number(number(a, 0)?.abs()))\n}\n",
        "sqrt" => r#"fn fn_sqrt(a: &[Value]) -> Result<Value, String> {
    let x = number(a, 0)?;
    if x < 0.0 {
        return Err(format!("cannot take the square root of negative number {}", x));
    }
    Ok(Value::Number(x.sqrt()))
}
"#,
        "pow" => "fn fn_pow(a: &[Value]) -> Result<Value, String> {\n    finite(number(a, 0)?.powf(number(a, 1)?))\n}\n",
        "exp" => "fn fn_exp(a: &[Value]) -> Result<Value, String> {\n    finite(number(a, 0)?.exp())\n}\n",
        "log" => r#"fn fn_log(a: &[Value]) -> Result<Value, String> {
    let x = number(a, 0)?;
    if x <= 0.0 {
        return Err(format!("logarithm of non-positive number {}", x));
    }
    Ok(Value::Number(x.ln()))
}
"#,
        "log10" => r#"fn fn_log10(a: &[Value]) -> Result<Value, String> {
    let x = number(a, 0)?;
    if x <= 0.0 {
        return Err(format!("logarithm of non-positive number {}", x));
    }
    Ok(Value::Number(x.log10()))
}
"#,
        "round" => r#"fn fn_round(a: &[Value]) -> Result<Value, String> {
    let x = number(a, 0)?;
    let digits = optional_number(a, 1)?.unwrap_or(0.0);
    if digits.fract() != 0.0 || !(0.0..=15.0).contains(&digits) {
        return Err(format!("digits must be an integer between 0 and 15, got {}", digits));
    }
    let factor = 10f64.powi(digits as i32);
    finite((x * factor).round() / factor)
}
"#,
        "floor" => "fn fn_floor(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Number(number(a, 0)?.floor()))\n}\n",
        "ceil" => "fn fn_ceil(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Number(number(a, 0)?.ceil()))\n}\n",
        "trunc" => "fn fn_trunc(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Number(number(a, 0)?.trunc()))\n}\n",
        "sign" => r#"fn fn_sign(a: &[Value]) -> Result<Value, String> {
    let x = number(a, 0)?;
    Ok(Value::Number(if x > 0.0 { 1.0 } else if x < 0.0 { -1.0 } else { 0.0 }))
}
"#,
        "clamp" => r#"fn fn_clamp(a: &[Value]) -> Result<Value, String> {
    let (x, lo, hi) = (number(a, 0)?, number(a, 1)?, number(a, 2)?);
    if lo > hi {
        return Err(format!("lower bound {} is above upper bound {}", lo, hi));
    }
    Ok(Value::Number(x.max(lo).min(hi)))
}
"#,
        "min" => r#"fn fn_min(a: &[Value]) -> Result<Value, String> {
    numbers(a)?
        .into_iter()
        .reduce(f64::min)
        .map(Value::Number)
        .ok_or_else(|| "needs at least one number".to_string())
}
"#,
        "max" => r#"fn fn_max(a: &[Value]) -> Result<Value, String> {
    numbers(a)?
        .into_iter()
        .reduce(f64::max)
        .map(Value::Number)
        .ok_or_else(|| "needs at least one number".to_string())
}
"#,

        // statistics
        "sum" => "fn fn_sum(a: &[Value]) -> Result<Value, String> {\n    finite(numbers(a)?.iter().sum())\n}\n",
        "avg" => r#"fn fn_avg(a: &[Value]) -> Result<Value, String> {
    let xs = numbers(a)?;
    if xs.is_empty() {
        return Err("avg of no values".into());
    }
    finite(xs.iter().sum::<f64>() / xs.len() as f64)
}
"#,
        "mean" => r#"fn fn_mean(a: &[Value]) -> Result<Value, String> {
    let xs = numbers(a)?;
    if xs.is_empty() {
        return Err("mean of no values".into());
    }
    finite(xs.iter().sum::<f64>() / xs.len() as f64)
}
"#,
        "median" => r#"fn fn_median(a: &[Value]) -> Result<Value, String> {
    let mut xs = numbers(a)?;
    if xs.is_empty() {
        return Err("median of no values".into());
    }
    xs.sort_by(f64::total_cmp);
    let mid = xs.len() / 2;
    Ok(Value::Number(if xs.len() % 2 == 0 { (xs[mid - 1] + xs[mid]) / 2.0 } else { xs[mid] }))
}
"#,
        "variance" => r#"fn fn_variance(a: &[Value]) -> Result<Value, String> {
    let xs = numbers(a)?;
    if xs.is_empty() {
        return Err("variance of no values".into());
    }
    let n = xs.len() as f64;
    let m = xs.iter().sum::<f64>() / n;
    finite(xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n)
}
"#,
        "stddev" => r#"fn fn_stddev(a: &[Value]) -> Result<Value, String> {
    let xs = numbers(a)?;
    if xs.is_empty() {
        return Err("stddev of no values".into());
    }
    let n = xs.len() as f64;
    let m = xs.iter().sum::<f64>() / n;
    finite((xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n).sqrt())
}
"#,
        "count" => r#"fn fn_count(a: &[Value]) -> Result<Value, String> {
    fn count(args: &[Value]) -> usize {
        args.iter()
            .map(|v| match v {
                Value::List(items) => count(items),
                _ => 1,
            })
            .sum()
    }
    Ok(Value::Number(count(a) as f64))
}
"#,

        // business
        "percentage" => r#"fn fn_percentage(a: &[Value]) -> Result<Value, String> {
    let (part, total) = (number(a, 0)?, number(a, 1)?);
    if total == 0.0 {
        return Err("total is zero".into());
    }
    finite(part / total * 100.0)
}
"#,
        "percent_of" => "fn fn_percent_of(a: &[Value]) -> Result<Value, String> {\n    finite(number(a, 0)? / 100.0 * number(a, 1)?)\n}\n",
        "discount" => "fn fn_discount(a: &[Value]) -> Result<Value, String> {\n    finite(number(a, 0)? * (1.0 - number(a, 1)? / 100.0))\n}\n",
        "markup" => "fn fn_markup(a: &[Value]) -> Result<Value, String> {\n    finite(number(a, 0)? * (1.0 + number(a, 1)? / 100.0))\n}\n",
        "tax" => "fn fn_tax(a: &[Value]) -> Result<Value, String> {\n    finite(number(a, 0)? * number(a, 1)?)\n}\n",
        "margin" => r#"fn fn_margin(a: &[Value]) -> Result<Value, String> {
    let (revenue, cost) = (number(a, 0)?, number(a, 1)?);
    if revenue == 0.0 {
        return Err("revenue is zero".into());
    }
    finite((revenue - cost) / revenue * 100.0)
}
"#,
        "simple_interest" => "fn fn_simple_interest(a: &[Value]) -> Result<Value, String> {\n    finite(number(a, 0)? * number(a, 1)? * number(a, 2)?)\n}\n",
        "compound_interest" => r#"fn fn_compound_interest(a: &[Value]) -> Result<Value, String> {
    let (p, rate, periods) = (number(a, 0)?, number(a, 1)?, number(a, 2)?);
    finite(p * ((1.0 + rate).powf(periods) - 1.0))
}
"#,
        "pmt" => r#"fn fn_pmt(a: &[Value]) -> Result<Value, String> {
    let (rate, periods, principal) = (number(a, 0)?, number(a, 1)?, number(a, 2)?);
    if periods <= 0.0 {
        return Err("number of periods must be positive".into());
    }
    if rate == 0.0 {
        return finite(principal / periods);
    }
    finite(principal * rate / (1.0 - (1.0 + rate).powf(-periods)))
}
"#,

        // utility
        "if" => "fn fn_if(a: &[Value]) -> Result<Value, String> {\n    Ok(if a[0].is_truthy() { a[1].clone() } else { a[2].clone() })\n}\n",
        "coalesce" => "fn fn_coalesce(a: &[Value]) -> Result<Value, String> {\n    Ok(a.iter().find(|v| **v != Value::Null).cloned().unwrap_or(Value::Null))\n}\n",
        "concat" => "fn fn_concat(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Str(a.iter().map(|v| v.to_string()).collect()))\n}\n",
        "len" => r#"fn fn_len(a: &[Value]) -> Result<Value, String> {
    match &a[0] {
        Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::List(items) => Ok(Value::Number(items.len() as f64)),
        other => Err(format!("len() needs a string or list, got {}", other.type_name())),
    }
}
"#,
        "lower" => "fn fn_lower(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Str(a[0].to_string().to_lowercase()))\n}\n",
        "upper" => "fn fn_upper(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Str(a[0].to_string().to_uppercase()))\n}\n",
        "to_number" => r#"fn fn_to_number(a: &[Value]) -> Result<Value, String> {
    match &a[0] {
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Number)
            .ok_or_else(|| format!("'{}' is not a number", s)),
        other => Err(format!("cannot convert {} to a number", other.type_name())),
    }
}
"#,
        "to_string" => "fn fn_to_string(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Str(a[0].to_string()))\n}\n",
        "is_null" => "fn fn_is_null(a: &[Value]) -> Result<Value, String> {\n    Ok(Value::Bool(a[0] == Value::Null))\n}\n",

        _ => return None,
    };
    Some(src)
}
