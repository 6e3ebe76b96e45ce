//! Per-call evaluation context.

use std::collections::BTreeMap;

use ruleform_core::strip_sigil;

use crate::error::{EvalError, ExprError};
use crate::value::Value;

/// Variables visible during one evaluation: the inputs plus everything
/// executed formulas have bound so far. Created and dropped per call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
}

impl Context {
    pub fn new(inputs: BTreeMap<String, Value>) -> Self {
        Context {
            vars: inputs,
            outputs: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Look up a referenced variable, failing with `MissingInput`.
    pub fn lookup(&self, name: &str, intermediate: bool) -> Result<&Value, ExprError> {
        self.vars.get(name).ok_or_else(|| ExprError::MissingInput {
            name: name.to_owned(),
            intermediate,
        })
    }

    /// Bind a computed value. Later bindings of the same name win.
    pub fn bind(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_owned(), value.clone());
        self.outputs.insert(name.to_owned(), value);
    }

    /// Every value bound by a formula; inputs are not echoed.
    pub fn into_outputs(self) -> BTreeMap<String, Value> {
        self.outputs
    }
}

/// Convert a JSON inputs object into runtime values. Keys may carry a `$`
/// prefix, which is stripped.
pub fn parse_inputs(inputs: &serde_json::Value) -> Result<BTreeMap<String, Value>, EvalError> {
    let obj = match inputs {
        serde_json::Value::Object(obj) => obj,
        serde_json::Value::Null => return Ok(BTreeMap::new()),
        other => {
            return Err(EvalError::InvalidInputs {
                message: format!("expected a JSON object, got {}", json_type(other)),
            })
        }
    };
    let mut out = BTreeMap::new();
    for (key, v) in obj {
        let value = Value::from_json(v).ok_or_else(|| EvalError::InvalidInputs {
            message: format!("input '{}' is an object; only scalars and lists are supported", key),
        })?;
        out.insert(strip_sigil(key).to_owned(), value);
    }
    Ok(out)
}

fn json_type(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inputs_are_not_outputs() {
        let inputs = parse_inputs(&json!({ "price": 10, "$discount": 0.1 })).unwrap();
        let mut ctx = Context::new(inputs);
        assert_eq!(ctx.get("discount"), Some(&Value::Number(0.1)));
        ctx.bind("total", Value::Number(9.0));
        let out = ctx.into_outputs();
        assert_eq!(out.len(), 1);
        assert_eq!(out["total"], Value::Number(9.0));
    }

    #[test]
    fn rejects_non_object_inputs() {
        let err = parse_inputs(&json!([1, 2])).unwrap_err();
        assert_eq!(err.to_string(), "invalid inputs: expected a JSON object, got array");
        assert!(parse_inputs(&json!({ "a": { "b": 1 } })).is_err());
        assert!(parse_inputs(&json!(null)).unwrap().is_empty());
    }

    #[test]
    fn lookup_reports_missing_names() {
        let ctx = Context::default();
        assert_eq!(
            ctx.lookup("b", false),
            Err(ExprError::MissingInput {
                name: "b".into(),
                intermediate: false
            })
        );
    }
}
