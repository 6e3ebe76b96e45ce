use super::{finite, numbers, Category, FunctionError, FunctionMeta, FunctionRegistry};
use crate::value::Value;

pub(super) fn register(reg: &mut FunctionRegistry) {
    let meta = |name: &str, desc: &str| {
        FunctionMeta::new(name, Category::Statistics, desc).arity(1, None)
    };

    reg.register(meta("sum", "sum of the arguments; lists are flattened"), |a| {
        finite(numbers(a)?.iter().sum())
    });
    reg.register(meta("avg", "arithmetic mean"), |a| mean(&nonempty(a, "avg")?));
    reg.register(meta("mean", "arithmetic mean (alias of avg)"), |a| {
        mean(&nonempty(a, "mean")?)
    });
    reg.register(meta("median", "middle value; mean of the two middle values for even counts"), |a| {
        let mut xs = nonempty(a, "median")?;
        xs.sort_by(f64::total_cmp);
        let mid = xs.len() / 2;
        let m = if xs.len() % 2 == 0 {
            (xs[mid - 1] + xs[mid]) / 2.0
        } else {
            xs[mid]
        };
        Ok(Value::Number(m))
    });
    reg.register(meta("variance", "population variance"), |a| {
        finite(variance(&nonempty(a, "variance")?))
    });
    reg.register(meta("stddev", "population standard deviation"), |a| {
        finite(variance(&nonempty(a, "stddev")?).sqrt())
    });
    reg.register(meta("count", "number of values; lists are flattened"), |a| {
        Ok(Value::Number(count(a) as f64))
    });
}

fn nonempty(args: &[Value], name: &str) -> Result<Vec<f64>, FunctionError> {
    let xs = numbers(args)?;
    if xs.is_empty() {
        return Err(FunctionError::new(format!("{} of no values", name)));
    }
    Ok(xs)
}

fn mean(xs: &[f64]) -> Result<Value, FunctionError> {
    finite(xs.iter().sum::<f64>() / xs.len() as f64)
}

fn variance(xs: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let m = xs.iter().sum::<f64>() / n;
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n
}

fn count(args: &[Value]) -> usize {
    args.iter()
        .map(|v| match v {
            Value::List(items) => count(items),
            _ => 1,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use crate::functions::FunctionRegistry;
    use crate::value::Value;

    fn nums(xs: &[f64]) -> Vec<Value> {
        xs.iter().map(|n| Value::Number(*n)).collect()
    }

    #[test]
    fn aggregates() {
        let reg = FunctionRegistry::with_builtins();
        let xs = nums(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(reg.call("sum", &xs), Ok(Value::Number(40.0)));
        assert_eq!(reg.call("avg", &xs), Ok(Value::Number(5.0)));
        assert_eq!(reg.call("mean", &xs), Ok(Value::Number(5.0)));
        assert_eq!(reg.call("median", &xs), Ok(Value::Number(4.5)));
        assert_eq!(reg.call("variance", &xs), Ok(Value::Number(4.0)));
        assert_eq!(reg.call("stddev", &xs), Ok(Value::Number(2.0)));
        assert_eq!(reg.call("count", &xs), Ok(Value::Number(8.0)));
    }

    #[test]
    fn empty_lists() {
        let reg = FunctionRegistry::with_builtins();
        let empty = [Value::List(vec![])];
        assert_eq!(reg.call("sum", &empty), Ok(Value::Number(0.0)));
        assert_eq!(reg.call("count", &empty), Ok(Value::Number(0.0)));
        let err = reg.call("avg", &empty).unwrap_err();
        assert!(err.to_string().contains("avg of no values"));
    }
}
