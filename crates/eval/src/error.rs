use ruleform_core::ConfigError;

use crate::functions::CallError;
use crate::ops::OpError;

/// Failure while evaluating one expression or condition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("missing {} '{name}'", variable_label(.intermediate))]
    MissingInput { name: String, intermediate: bool },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    /// Domain error inside an operator or function call.
    #[error("{message} in `{expr}`")]
    Evaluation { message: String, expr: String },

    #[error("type error: {message} in `{expr}`")]
    Type { message: String, expr: String },

    /// No clause or branch matched and there is no default.
    #[error("{detail}")]
    NoMatch { detail: String },
}

fn variable_label(intermediate: &bool) -> &'static str {
    if *intermediate {
        "intermediate variable"
    } else {
        "input"
    }
}

impl ExprError {
    pub fn from_op(err: OpError, expr: impl Into<String>) -> Self {
        match err {
            OpError::Type(message) => ExprError::Type {
                message,
                expr: expr.into(),
            },
            OpError::Domain(message) => ExprError::Evaluation {
                message,
                expr: expr.into(),
            },
        }
    }

    pub fn from_call(err: CallError, expr: impl Into<String>) -> Self {
        match err {
            CallError::UnknownFunction { name } => ExprError::UnknownFunction { name },
            other => ExprError::Evaluation {
                message: other.to_string(),
                expr: expr.into(),
            },
        }
    }

    /// Attach the id of the formula being executed.
    pub fn in_formula(self, formula: &str) -> EvalError {
        let formula = formula.to_owned();
        match self {
            ExprError::MissingInput { name, intermediate } => EvalError::MissingInput {
                formula,
                name,
                intermediate,
            },
            ExprError::UnknownFunction { name } => EvalError::UnknownFunction { formula, name },
            ExprError::Evaluation { message, expr } => EvalError::Evaluation {
                formula,
                message,
                expr,
            },
            ExprError::Type { message, expr } => EvalError::Type {
                formula,
                message,
                expr,
            },
            ExprError::NoMatch { detail } => EvalError::NoMatch { formula, detail },
        }
    }
}

/// Failure of a whole evaluation. No partial results accompany it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The document is invalid; nothing was executed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid inputs: {message}")]
    InvalidInputs { message: String },

    /// `intermediate` is set for `$name` references, which a formula
    /// should have produced.
    #[error("formula '{formula}': missing {} '{name}'", variable_label(.intermediate))]
    MissingInput {
        formula: String,
        name: String,
        intermediate: bool,
    },

    #[error("formula '{formula}': unknown function '{name}'")]
    UnknownFunction { formula: String, name: String },

    #[error("formula '{formula}': {message} in `{expr}`")]
    Evaluation {
        formula: String,
        message: String,
        expr: String,
    },

    #[error("formula '{formula}': type error: {message} in `{expr}`")]
    Type {
        formula: String,
        message: String,
        expr: String,
    },

    /// No clause or branch matched and there is no default.
    #[error("formula '{formula}': {detail}")]
    NoMatch { formula: String, detail: String },
}

impl EvalError {
    /// The formula that failed, for runtime errors.
    pub fn formula(&self) -> Option<&str> {
        match self {
            EvalError::MissingInput { formula, .. }
            | EvalError::UnknownFunction { formula, .. }
            | EvalError::Evaluation { formula, .. }
            | EvalError::Type { formula, .. }
            | EvalError::NoMatch { formula, .. } => Some(formula),
            EvalError::Config(_) | EvalError::InvalidInputs { .. } => None,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Config(ConfigError::CyclicDependency { .. }) => "cyclic_dependency",
            EvalError::Config(ConfigError::Parse { .. }) => "parse_error",
            EvalError::Config(_) => "config_error",
            EvalError::InvalidInputs { .. } => "invalid_inputs",
            EvalError::MissingInput { .. } => "missing_input",
            EvalError::UnknownFunction { .. } => "unknown_function",
            EvalError::Evaluation { .. } => "evaluation_error",
            EvalError::Type { .. } => "type_error",
            EvalError::NoMatch { .. } => "no_match",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "formula": self.formula(),
                "message": self.to_string(),
            }
        })
    }
}
