//! Operator semantics shared by the interpreter and the compiled backends.

use std::cmp::Ordering;

use ruleform_core::{BinaryOp, CompareOp};

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpError {
    /// Operand types the operator does not accept.
    #[error("type error: {0}")]
    Type(String),
    /// Division by zero, non-finite result and similar.
    #[error("{0}")]
    Domain(String),
}

/// Apply a binary operator.
///
/// Arithmetic accepts numbers only; strings never take part in it.
/// Division and modulo by zero fail, as does any non-finite result.
pub fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, OpError> {
    if let BinaryOp::Compare(c) = op {
        return compare(c, l, r).map(Value::Bool);
    }
    let (a, b) = match (l, r) {
        (Value::Number(a), Value::Number(b)) => (*a, *b),
        _ => {
            return Err(OpError::Type(format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                l.type_name(),
                r.type_name()
            )))
        }
    };
    let n = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Err(OpError::Domain("division by zero".into())),
        BinaryOp::Div => a / b,
        BinaryOp::Mod if b == 0.0 => return Err(OpError::Domain("modulo by zero".into())),
        BinaryOp::Mod => a % b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Compare(c) => return compare(c, l, r).map(Value::Bool),
    };
    finite(n, op.symbol())
}

pub fn negate(v: &Value) -> Result<Value, OpError> {
    match v {
        Value::Number(n) => Ok(Value::Number(-n)),
        other => Err(OpError::Type(format!("cannot negate {}", other.type_name()))),
    }
}

/// Reject NaN and infinities produced by `what`.
pub fn finite(n: f64, what: &str) -> Result<Value, OpError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(OpError::Domain(format!(
            "result of '{}' is not a finite number",
            what
        )))
    }
}

/// Equality across types: numbers compare numerically, lists element-wise,
/// values of different types are never equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Result<Ordering, OpError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .partial_cmp(y)
            .ok_or_else(|| OpError::Domain("cannot order non-finite numbers".into())),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => Err(OpError::Type(format!(
            "cannot order {} against {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

pub fn compare(op: CompareOp, l: &Value, r: &Value) -> Result<bool, OpError> {
    match op {
        CompareOp::Eq => Ok(values_equal(l, r)),
        CompareOp::Ne => Ok(!values_equal(l, r)),
        CompareOp::Gt => Ok(ordering(l, r)? == Ordering::Greater),
        CompareOp::Gte => Ok(ordering(l, r)? != Ordering::Less),
        CompareOp::Lt => Ok(ordering(l, r)? == Ordering::Less),
        CompareOp::Lte => Ok(ordering(l, r)? != Ordering::Greater),
        CompareOp::Between => match r {
            Value::List(bounds) if bounds.len() == 2 => {
                Ok(ordering(l, &bounds[0])? != Ordering::Less
                    && ordering(l, &bounds[1])? != Ordering::Greater)
            }
            other => Err(OpError::Type(format!(
                "'between' requires a list of two bounds, got {}",
                describe_list(other)
            ))),
        },
        CompareOp::In | CompareOp::NotIn => match r {
            Value::List(items) => {
                let found = items.iter().any(|item| values_equal(l, item));
                Ok(found == (op == CompareOp::In))
            }
            other => Err(OpError::Type(format!(
                "'{}' requires a list, got {}",
                op.name(),
                other.type_name()
            ))),
        },
        CompareOp::Contains => match l {
            Value::List(items) => Ok(items.iter().any(|item| values_equal(item, r))),
            _ => Ok(l.to_string().contains(&r.to_string())),
        },
        CompareOp::StartsWith => Ok(l.to_string().starts_with(&r.to_string())),
    }
}

fn describe_list(v: &Value) -> String {
    match v {
        Value::List(items) => format!("a list of {}", items.len()),
        other => other.type_name().to_owned(),
    }
}
