//! Expression evaluator.
//!
//! Walks a parsed [`Expr`] tree against a [`Context`]. Operands and call
//! arguments are evaluated left to right; the first error aborts the walk
//! and carries the source form of the failing sub-expression.

use ruleform_core::{Expr, UnaryOp};

use crate::context::Context;
use crate::error::ExprError;
use crate::functions::FunctionRegistry;
use crate::ops;
use crate::value::Value;

pub fn eval_expr(
    expr: &Expr,
    ctx: &Context,
    registry: &FunctionRegistry,
) -> Result<Value, ExprError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Var { name, intermediate } => ctx.lookup(name, *intermediate).cloned(),
        Expr::Group(inner) => eval_expr(inner, ctx, registry),

        Expr::Unary { op, operand } => {
            let v = eval_expr(operand, ctx, registry)?;
            match op {
                UnaryOp::Neg => ops::negate(&v).map_err(|e| ExprError::from_op(e, expr.to_string())),
            }
        }

        Expr::Binary { op, lhs, rhs } => {
            let l = eval_expr(lhs, ctx, registry)?;
            let r = eval_expr(rhs, ctx, registry)?;
            ops::binary(*op, &l, &r).map_err(|e| ExprError::from_op(e, expr.to_string()))
        }

        Expr::Call { name, args } => {
            if !registry.has(name) {
                return Err(ExprError::UnknownFunction { name: name.clone() });
            }
            let values = args
                .iter()
                .map(|a| eval_expr(a, ctx, registry))
                .collect::<Result<Vec<_>, _>>()?;
            registry
                .call(name, &values)
                .map_err(|e| ExprError::from_call(e, expr.to_string()))
        }
    }
}
