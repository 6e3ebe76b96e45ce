use super::{Category, FunctionError, FunctionMeta, FunctionRegistry};
use crate::value::Value;

pub(super) fn register(reg: &mut FunctionRegistry) {
    let meta = |name: &str, desc: &str| FunctionMeta::new(name, Category::Utility, desc);

    // Arguments are evaluated before the call, so both branches of `if`
    // must evaluate without error.
    reg.register(meta("if", "b when cond is truthy, else c").exact(3), |a| {
        Ok(if a[0].is_truthy() { a[1].clone() } else { a[2].clone() })
    });
    reg.register(meta("coalesce", "first non-null argument").arity(1, None), |a| {
        Ok(a.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
    });
    reg.register(meta("concat", "arguments joined as strings").arity(1, None), |a| {
        Ok(Value::Str(a.iter().map(|v| v.to_string()).collect()))
    });
    reg.register(meta("len", "length of a string or list").exact(1), |a| match &a[0] {
        Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::List(items) => Ok(Value::Number(items.len() as f64)),
        other => Err(FunctionError::new(format!(
            "len() needs a string or list, got {}",
            other.type_name()
        ))),
    });
    reg.register(meta("lower", "lowercase string").exact(1), |a| {
        Ok(Value::Str(a[0].to_string().to_lowercase()))
    });
    reg.register(meta("upper", "uppercase string").exact(1), |a| {
        Ok(Value::Str(a[0].to_string().to_uppercase()))
    });
    reg.register(meta("to_number", "parse a string or convert a boolean to a number").exact(1), |a| {
        to_number(&a[0]).map(Value::Number)
    });
    reg.register(meta("to_string", "string form of any value").exact(1), |a| {
        Ok(Value::Str(a[0].to_string()))
    });
    reg.register(meta("is_null", "whether the argument is null").exact(1), |a| {
        Ok(Value::Bool(a[0].is_null()))
    });
}

fn to_number(v: &Value) -> Result<f64, FunctionError> {
    match v {
        Value::Number(n) => Ok(*n),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| FunctionError::new(format!("'{}' is not a number", s))),
        other => Err(FunctionError::new(format!(
            "cannot convert {} to a number",
            other.type_name()
        ))),
    }
}
