//! ruleform-core: the static half of the rule engine.
//!
//! Turns a JSON rule document into an [`ExecutionPlan`]: formulas parsed
//! into a typed model, expressions parsed into ASTs, and the formula list
//! put into a deterministic, cycle-free execution order.
//!
//! # Public API
//!
//! - [`parse_expression()`] -- tokenize and parse one expression string
//! - [`Document::from_json()`] -- parse a rule document
//! - [`resolve()`] -- build the formula graph and order the formulas
//! - [`validate()`] / [`check()`] -- the ConfigValidator
//! - error types: [`ParseError`], [`ConfigError`]

pub mod ast;
pub mod document;
pub mod error;
pub mod graph;
pub mod lexer;
pub mod parser;
pub mod validate;

// ── Convenience re-exports: key types ────────────────────────────────

pub use ast::{strip_sigil, BinaryOp, CompareOp, Expr, Literal, UnaryOp};
pub use document::{
    AccumulativeScoring, Assignment, ClauseResult, Condition, Document, Formula, FormulaKind,
    MultiDimensionalScoring, Operand, ScoreBranch, ScoreLeaf, ScoreNode, ScoreRange, ScoringRule,
    Switch, WhenClause,
};
pub use error::{ConfigError, ParseError};
pub use graph::{ExecutionPlan, FormulaGraph};
pub use validate::{Checked, ValidationReport};

// ── Convenience re-exports: pipeline entry points ────────────────────

pub use graph::resolve;
pub use parser::parse_expression;
pub use validate::{check, validate};
