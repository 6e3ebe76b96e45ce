//! Business arithmetic. Percentages (`pct`) are written as 0-100; rates
//! for tax, interest and loan payments are fractions (0.08 for 8%).

use super::{finite, number, Category, FunctionError, FunctionMeta, FunctionRegistry};

pub(super) fn register(reg: &mut FunctionRegistry) {
    let meta = |name: &str, desc: &str, n: usize| {
        FunctionMeta::new(name, Category::Business, desc).exact(n)
    };

    reg.register(meta("percentage", "part as a percentage of total", 2), |a| {
        let (part, total) = (number(a, 0)?, number(a, 1)?);
        if total == 0.0 {
            return Err(FunctionError::new("total is zero"));
        }
        finite(part / total * 100.0)
    });
    reg.register(meta("percent_of", "pct percent of value", 2), |a| {
        finite(number(a, 0)? / 100.0 * number(a, 1)?)
    });
    reg.register(meta("discount", "price reduced by pct percent", 2), |a| {
        finite(number(a, 0)? * (1.0 - number(a, 1)? / 100.0))
    });
    reg.register(meta("markup", "cost increased by pct percent", 2), |a| {
        finite(number(a, 0)? * (1.0 + number(a, 1)? / 100.0))
    });
    reg.register(meta("tax", "tax due on amount at a fractional rate", 2), |a| {
        finite(number(a, 0)? * number(a, 1)?)
    });
    reg.register(meta("margin", "profit margin of revenue over cost, in percent", 2), |a| {
        let (revenue, cost) = (number(a, 0)?, number(a, 1)?);
        if revenue == 0.0 {
            return Err(FunctionError::new("revenue is zero"));
        }
        finite((revenue - cost) / revenue * 100.0)
    });
    reg.register(
        meta("simple_interest", "interest on principal at rate over periods", 3),
        |a| finite(number(a, 0)? * number(a, 1)? * number(a, 2)?),
    );
    reg.register(
        meta("compound_interest", "interest earned compounding once per period", 3),
        |a| {
            let (p, rate, periods) = (number(a, 0)?, number(a, 1)?, number(a, 2)?);
            finite(p * ((1.0 + rate).powf(periods) - 1.0))
        },
    );
    reg.register(
        meta("pmt", "fixed payment per period repaying principal at rate", 3),
        |a| {
            let (rate, periods, principal) = (number(a, 0)?, number(a, 1)?, number(a, 2)?);
            if periods <= 0.0 {
                return Err(FunctionError::new("number of periods must be positive"));
            }
            if rate == 0.0 {
                return finite(principal / periods);
            }
            finite(principal * rate / (1.0 - (1.0 + rate).powf(-periods)))
        },
    );
}

#[cfg(test)]
mod tests {
    use crate::functions::FunctionRegistry;
    use crate::value::Value;

    fn call(name: &str, args: &[f64]) -> f64 {
        let args: Vec<Value> = args.iter().map(|n| Value::Number(*n)).collect();
        match FunctionRegistry::with_builtins().call(name, &args) {
            Ok(Value::Number(n)) => n,
            other => panic!("{}: unexpected {:?}", name, other),
        }
    }

    #[test]
    fn percentages() {
        assert_eq!(call("percentage", &[25.0, 200.0]), 12.5);
        assert_eq!(call("percent_of", &[10.0, 250.0]), 25.0);
        assert_eq!(call("discount", &[200.0, 15.0]), 170.0);
        assert_eq!(call("markup", &[100.0, 20.0]), 120.0);
        assert_eq!(call("margin", &[200.0, 150.0]), 25.0);
        assert_eq!(call("tax", &[100.0, 0.08]), 8.0);
    }

    #[test]
    fn interest_and_payments() {
        assert_eq!(call("simple_interest", &[1000.0, 0.05, 3.0]), 150.0);
        assert!((call("compound_interest", &[1000.0, 0.1, 2.0]) - 210.0).abs() < 1e-9);
        assert!((call("pmt", &[0.01, 12.0, 1200.0]) - 106.618_546_414).abs() < 1e-6);
        assert_eq!(call("pmt", &[0.0, 10.0, 1000.0]), 100.0);
    }

    #[test]
    fn zero_denominators_fail() {
        let reg = FunctionRegistry::with_builtins();
        assert!(reg
            .call("percentage", &[Value::Number(1.0), Value::Number(0.0)])
            .is_err());
        assert!(reg
            .call("pmt", &[Value::Number(0.1), Value::Number(0.0), Value::Number(5.0)])
            .is_err());
    }
}
