use super::{finite, number, numbers, optional_number, Category, FunctionError, FunctionMeta, FunctionRegistry};
use crate::value::Value;

pub(super) fn register(reg: &mut FunctionRegistry) {
    let meta = |name: &str, desc: &str| FunctionMeta::new(name, Category::Math, desc);

    reg.register(meta("abs", "absolute value").exact(1), |a| {
        Ok(Value::Number(number(a, 0)?.abs()))
    });
    reg.register(meta("sqrt", "square root; fails on negative input").exact(1), |a| {
        let x = number(a, 0)?;
        if x < 0.0 {
            return Err(FunctionError::new(format!(
                "cannot take the square root of negative number {}",
                x
            )));
        }
        Ok(Value::Number(x.sqrt()))
    });
    reg.register(meta("pow", "base raised to exponent").exact(2), |a| {
        finite(number(a, 0)?.powf(number(a, 1)?))
    });
    reg.register(meta("exp", "e raised to x").exact(1), |a| finite(number(a, 0)?.exp()));
    reg.register(meta("log", "natural logarithm; fails on non-positive input").exact(1), |a| {
        Ok(Value::Number(positive(number(a, 0)?)?.ln()))
    });
    reg.register(meta("log10", "base-10 logarithm; fails on non-positive input").exact(1), |a| {
        Ok(Value::Number(positive(number(a, 0)?)?.log10()))
    });
    reg.register(
        meta("round", "round half away from zero, optionally to a number of decimal digits")
            .arity(1, Some(2)),
        |a| {
            let x = number(a, 0)?;
            let digits = optional_number(a, 1)?.unwrap_or(0.0);
            round_to(x, digits)
        },
    );
    reg.register(meta("floor", "largest integer not above x").exact(1), |a| {
        Ok(Value::Number(number(a, 0)?.floor()))
    });
    reg.register(meta("ceil", "smallest integer not below x").exact(1), |a| {
        Ok(Value::Number(number(a, 0)?.ceil()))
    });
    reg.register(meta("trunc", "integer part of x").exact(1), |a| {
        Ok(Value::Number(number(a, 0)?.trunc()))
    });
    reg.register(meta("sign", "-1, 0 or 1").exact(1), |a| {
        let x = number(a, 0)?;
        let s = if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        };
        Ok(Value::Number(s))
    });
    reg.register(meta("clamp", "x limited to [lo, hi]").exact(3), |a| {
        let (x, lo, hi) = (number(a, 0)?, number(a, 1)?, number(a, 2)?);
        if lo > hi {
            return Err(FunctionError::new(format!(
                "lower bound {} is above upper bound {}",
                lo, hi
            )));
        }
        Ok(Value::Number(x.max(lo).min(hi)))
    });
    reg.register(meta("min", "smallest of the arguments; lists are flattened").arity(1, None), |a| {
        extreme(a, f64::min)
    });
    reg.register(meta("max", "largest of the arguments; lists are flattened").arity(1, None), |a| {
        extreme(a, f64::max)
    });
}

fn positive(x: f64) -> Result<f64, FunctionError> {
    if x <= 0.0 {
        Err(FunctionError::new(format!(
            "logarithm of non-positive number {}",
            x
        )))
    } else {
        Ok(x)
    }
}

fn round_to(x: f64, digits: f64) -> Result<Value, FunctionError> {
    if digits.fract() != 0.0 || !(0.0..=15.0).contains(&digits) {
        return Err(FunctionError::new(format!(
            "digits must be an integer between 0 and 15, got {}",
            digits
        )));
    }
    let factor = 10f64.powi(digits as i32);
    finite((x * factor).round() / factor)
}

fn extreme(args: &[Value], pick: fn(f64, f64) -> f64) -> Result<Value, FunctionError> {
    let values = numbers(args)?;
    values
        .into_iter()
        .reduce(pick)
        .map(Value::Number)
        .ok_or_else(|| FunctionError::new("needs at least one number"))
}
