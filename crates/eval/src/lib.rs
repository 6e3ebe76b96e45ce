//! ruleform-eval: the runtime half of the rule engine.
//!
//! Takes a JSON rule document plus a JSON object of inputs, prepares an
//! execution plan through `ruleform-core`, and runs every formula in order
//! against a per-call context, producing the computed values.
//!
//! ```ignore
//! let engine = ruleform_eval::Engine::new();
//! let out = engine.evaluate(&rules, &serde_json::json!({ "price": 10 }))?;
//! println!("{}", out.to_json());
//! ```

pub mod clock;
pub mod condition;
pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod functions;
pub mod ops;
pub mod processor;
pub mod scoring;
pub mod value;

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::{parse_inputs, Context};
pub use engine::{Engine, EngineConfig, Evaluation};
pub use error::{EvalError, ExprError};
pub use functions::{
    BoundFunction, CallError, Category, FunctionError, FunctionMeta, FunctionRegistry,
};
pub use value::Value;

/// Evaluate a rule document once with a default engine.
///
/// Convenience for one-off calls; long-lived callers should keep an
/// [`Engine`] so prepared plans are reused.
pub fn evaluate(
    config: &serde_json::Value,
    inputs: &serde_json::Value,
) -> Result<Evaluation, EvalError> {
    Engine::with_config(EngineConfig {
        cache_plans: false,
        ..EngineConfig::default()
    })
    .evaluate(config, inputs)
}
