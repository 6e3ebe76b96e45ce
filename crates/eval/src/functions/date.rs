//! Calendar built-ins. Dates are `YYYY-MM-DD` strings; longer ISO-8601
//! strings are accepted and truncated to their date part.

use std::sync::Arc;

use time::macros::format_description;
use time::Date;

use super::{string, Category, FunctionError, FunctionMeta, FunctionRegistry};
use crate::clock::Clock;
use crate::value::Value;

pub(super) fn register(reg: &mut FunctionRegistry, clock: Arc<dyn Clock>) {
    let meta = |name: &str, desc: &str, n: usize| {
        FunctionMeta::new(name, Category::Date, desc).exact(n)
    };

    let c = clock.clone();
    reg.register(meta("now", "current time as unix seconds", 0).impure(), move |_| {
        Ok(Value::Number(c.now().unix_timestamp() as f64))
    });
    let c = clock.clone();
    reg.register(meta("today", "current date as YYYY-MM-DD", 0).impure(), move |_| {
        format_date(c.now().date()).map(Value::Str)
    });
    reg.register(meta("year", "year of a date", 1), |a| {
        Ok(Value::Number(parse_date(string(a, 0)?)?.year() as f64))
    });
    reg.register(meta("month", "month (1-12) of a date", 1), |a| {
        Ok(Value::Number(u8::from(parse_date(string(a, 0)?)?.month()) as f64))
    });
    reg.register(meta("day", "day of month of a date", 1), |a| {
        Ok(Value::Number(parse_date(string(a, 0)?)?.day() as f64))
    });
    reg.register(meta("days_between", "whole days from the first date to the second", 2), |a| {
        let from = parse_date(string(a, 0)?)?;
        let to = parse_date(string(a, 1)?)?;
        Ok(Value::Number((to - from).whole_days() as f64))
    });
    let c = clock;
    reg.register(meta("age", "completed years since a birth date", 1).impure(), move |a| {
        let born = parse_date(string(a, 0)?)?;
        let today = c.now().date();
        if born > today {
            return Err(FunctionError::new(format!("birth date {} is in the future", born)));
        }
        let mut years = today.year() - born.year();
        if (today.month() as u8, today.day()) < (born.month() as u8, born.day()) {
            years -= 1;
        }
        Ok(Value::Number(years as f64))
    });
}

fn parse_date(s: &str) -> Result<Date, FunctionError> {
    let head = s.get(..10).unwrap_or(s);
    Date::parse(head, format_description!("[year]-[month]-[day]"))
        .map_err(|e| FunctionError::new(format!("invalid date '{}': {}", s, e)))
}

fn format_date(d: Date) -> Result<String, FunctionError> {
    d.format(format_description!("[year]-[month]-[day]"))
        .map_err(|e| FunctionError::new(format!("cannot format date: {}", e)))
}
