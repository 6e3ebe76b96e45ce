//! Function registry.
//!
//! The registry is an owned value held by an engine, so several engines
//! with different custom functions can coexist in one process. Names are
//! unique; registering an existing name replaces the previous entry.

mod business;
mod date;
mod math;
mod statistics;
mod utility;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::value::Value;

/// Function body: receives the evaluated arguments.
pub type Handler = Arc<dyn Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Math,
    Statistics,
    Business,
    Date,
    Utility,
    Custom,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Math => "math",
            Category::Statistics => "statistics",
            Category::Business => "business",
            Category::Date => "date",
            Category::Utility => "utility",
            Category::Custom => "custom",
        }
    }

    pub fn from_name(name: &str) -> Option<Category> {
        let c = match name {
            "math" => Category::Math,
            "statistics" => Category::Statistics,
            "business" => Category::Business,
            "date" => Category::Date,
            "utility" => Category::Utility,
            "custom" => Category::Custom,
            _ => return None,
        };
        Some(c)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionMeta {
    pub name: String,
    pub category: Category,
    pub description: String,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    /// Same arguments always give the same result (no clock, no state).
    pub pure: bool,
}

impl FunctionMeta {
    pub fn new(name: &str, category: Category, description: &str) -> Self {
        FunctionMeta {
            name: name.to_owned(),
            category,
            description: description.to_owned(),
            min_args: 0,
            max_args: None,
            pure: true,
        }
    }

    pub fn arity(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }

    pub fn exact(self, n: usize) -> Self {
        self.arity(n, Some(n))
    }

    pub fn impure(mut self) -> Self {
        self.pure = false;
        self
    }

    fn arity_text(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{}", max),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

/// An error raised inside a function body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        FunctionError {
            message: message.into(),
        }
    }
}

/// Failure of [`FunctionRegistry::call`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("{name}() takes {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("{name}(): {source}")]
    Failed {
        name: String,
        #[source]
        source: FunctionError,
    },
}

#[derive(Clone)]
struct Entry {
    meta: FunctionMeta,
    handler: Handler,
}

#[derive(Clone)]
pub struct FunctionRegistry {
    entries: BTreeMap<String, Entry>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    /// A registry with no functions at all.
    pub fn empty() -> Self {
        FunctionRegistry {
            entries: BTreeMap::new(),
        }
    }

    /// All built-ins, with date functions reading the system clock.
    pub fn with_builtins() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// All built-ins, with date functions reading `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut reg = Self::empty();
        math::register(&mut reg);
        statistics::register(&mut reg);
        business::register(&mut reg);
        date::register(&mut reg, clock);
        utility::register(&mut reg);
        reg
    }

    /// Add or replace a function.
    pub fn register<F>(&mut self, meta: FunctionMeta, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        let name = meta.name.clone();
        if self.entries.contains_key(&name) {
            tracing::debug!(function = %name, "replacing registered function");
        }
        self.entries.insert(
            name,
            Entry {
                meta,
                handler: Arc::new(handler),
            },
        );
    }

    /// Call `name` with already evaluated arguments.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, CallError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| CallError::UnknownFunction {
                name: name.to_owned(),
            })?;
        check_arity(&entry.meta, args.len())?;
        (entry.handler)(args).map_err(|source| CallError::Failed {
            name: name.to_owned(),
            source,
        })
    }

    /// Resolve a function once, for callers that invoke it repeatedly.
    /// The returned closure performs the same checks as [`call`](Self::call).
    pub fn bind(&self, name: &str) -> Option<BoundFunction> {
        self.entries.get(name).map(|e| BoundFunction {
            meta: e.meta.clone(),
            handler: e.handler.clone(),
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionMeta> {
        self.entries.get(name).map(|e| &e.meta)
    }

    /// Every function, sorted by name.
    pub fn list(&self) -> Vec<&FunctionMeta> {
        self.entries.values().map(|e| &e.meta).collect()
    }

    pub fn by_category(&self, category: Category) -> Vec<&FunctionMeta> {
        self.entries
            .values()
            .map(|e| &e.meta)
            .filter(|m| m.category == category)
            .collect()
    }
}

/// A function resolved ahead of time by [`FunctionRegistry::bind`].
#[derive(Clone)]
pub struct BoundFunction {
    meta: FunctionMeta,
    handler: Handler,
}

impl BoundFunction {
    pub fn meta(&self) -> &FunctionMeta {
        &self.meta
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, CallError> {
        check_arity(&self.meta, args.len())?;
        (self.handler)(args).map_err(|source| CallError::Failed {
            name: self.meta.name.clone(),
            source,
        })
    }
}

impl fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFunction")
            .field("name", &self.meta.name)
            .finish()
    }
}

fn check_arity(meta: &FunctionMeta, got: usize) -> Result<(), CallError> {
    let too_many = meta.max_args.is_some_and(|max| got > max);
    if got < meta.min_args || too_many {
        return Err(CallError::Arity {
            name: meta.name.clone(),
            expected: meta.arity_text(),
            got,
        });
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Argument helpers shared by the built-in modules
// ──────────────────────────────────────────────

pub(crate) fn number(args: &[Value], i: usize) -> Result<f64, FunctionError> {
    match args.get(i) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(FunctionError::new(format!(
            "argument {} must be a number, got {}",
            i + 1,
            other.type_name()
        ))),
        None => Err(FunctionError::new(format!("missing argument {}", i + 1))),
    }
}

pub(crate) fn optional_number(args: &[Value], i: usize) -> Result<Option<f64>, FunctionError> {
    match args.get(i) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => number(args, i).map(Some),
    }
}

pub(crate) fn string(args: &[Value], i: usize) -> Result<&str, FunctionError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(FunctionError::new(format!(
            "argument {} must be a string, got {}",
            i + 1,
            other.type_name()
        ))),
        None => Err(FunctionError::new(format!("missing argument {}", i + 1))),
    }
}

/// All numeric arguments, with list arguments flattened.
pub(crate) fn numbers(args: &[Value]) -> Result<Vec<f64>, FunctionError> {
    let mut out = Vec::with_capacity(args.len());
    fn push(v: &Value, out: &mut Vec<f64>) -> Result<(), FunctionError> {
        match v {
            Value::Number(n) => out.push(*n),
            Value::List(items) => {
                for item in items {
                    push(item, out)?;
                }
            }
            other => {
                return Err(FunctionError::new(format!(
                    "expected numbers, got {}",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }
    for a in args {
        push(a, &mut out)?;
    }
    Ok(out)
}

/// Wrap a computed number, rejecting NaN and infinities.
pub(crate) fn finite(n: f64) -> Result<Value, FunctionError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(FunctionError::new("result is not a finite number"))
    }
}
