//! The rule engine: plan preparation, caching and evaluation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ruleform_core::{check, ExecutionPlan};

use crate::context::parse_inputs;
use crate::error::EvalError;
use crate::functions::{FunctionError, FunctionMeta, FunctionRegistry};
use crate::processor::execute;
use crate::value::Value;

/// Engine tuning, usually read from the `[engine]` table of `ruleform.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reuse execution plans for identical documents.
    pub cache_plans: bool,
    /// Oldest plans are evicted past this many entries.
    pub max_cached_plans: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_plans: true,
            max_cached_plans: 64,
        }
    }
}

/// Outcome of one successful evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Values bound by the formulas, keyed by name.
    pub results: BTreeMap<String, Value>,
    /// Formula ids in execution order.
    pub order: Vec<String>,
    pub elapsed: Duration,
}

impl Evaluation {
    pub fn results_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.results
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// The `{"success": true, ...}` envelope.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": true,
            "results": self.results_json(),
            "order": self.order,
            "execution_time_ms": self.elapsed.as_secs_f64() * 1000.0,
        })
    }
}

#[derive(Debug, Default)]
struct PlanCache {
    plans: HashMap<String, Arc<ExecutionPlan>>,
    inserted: VecDeque<String>,
}

impl PlanCache {
    fn insert(&mut self, key: String, plan: Arc<ExecutionPlan>, limit: usize) {
        if self.plans.contains_key(&key) {
            return;
        }
        while self.inserted.len() >= limit {
            match self.inserted.pop_front() {
                Some(old) => {
                    self.plans.remove(&old);
                }
                None => break,
            }
        }
        self.inserted.push_back(key.clone());
        self.plans.insert(key, plan);
    }
}

/// Evaluates rule documents against inputs.
///
/// The engine holds no per-evaluation state: every call builds a fresh
/// context, so one engine may serve many documents and concurrent callers.
/// Prepared plans are cached by a SHA-256 fingerprint of the document.
#[derive(Debug)]
pub struct Engine {
    registry: FunctionRegistry,
    config: EngineConfig,
    cache: RwLock<PlanCache>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Engine {
            registry: FunctionRegistry::with_builtins(),
            config,
            cache: RwLock::new(PlanCache::default()),
        }
    }

    /// Replace the function registry, e.g. one with a fixed clock.
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a custom function. A later registration under the same
    /// name replaces the earlier one.
    pub fn register_function<F>(&mut self, meta: FunctionMeta, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.registry.register(meta, handler);
    }

    /// Validate and order a document, reusing a cached plan when possible.
    pub fn prepare(&self, config: &serde_json::Value) -> Result<Arc<ExecutionPlan>, EvalError> {
        if !self.caching() {
            return Ok(Arc::new(check(config).into_plan()?));
        }

        let key = fingerprint(config);
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .plans
            .get(&key)
            .cloned();
        if let Some(plan) = cached {
            tracing::debug!(fingerprint = %&key[..12], "plan cache hit");
            return Ok(plan);
        }

        let plan = Arc::new(check(config).into_plan()?);
        tracing::info!(
            fingerprint = %&key[..12],
            formulas = plan.formulas.len(),
            "prepared execution plan"
        );
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, plan.clone(), self.config.max_cached_plans);
        Ok(plan)
    }

    /// Evaluate a rule document against a JSON object of inputs.
    pub fn evaluate(
        &self,
        config: &serde_json::Value,
        inputs: &serde_json::Value,
    ) -> Result<Evaluation, EvalError> {
        let inputs = parse_inputs(inputs)?;
        let plan = self.prepare(config)?;
        self.run(&plan, inputs)
    }

    /// Evaluate an already prepared plan.
    pub fn evaluate_plan(
        &self,
        plan: &ExecutionPlan,
        inputs: &serde_json::Value,
    ) -> Result<Evaluation, EvalError> {
        let inputs = parse_inputs(inputs)?;
        self.run(plan, inputs)
    }

    fn run(&self, plan: &ExecutionPlan, inputs: BTreeMap<String, Value>) -> Result<Evaluation, EvalError> {
        let start = Instant::now();
        let results = execute(plan, inputs, &self.registry)?;
        let elapsed = start.elapsed();
        tracing::debug!(
            formulas = plan.formulas.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "evaluation finished"
        );
        Ok(Evaluation {
            results,
            order: plan.order().into_iter().map(str::to_owned).collect(),
            elapsed,
        })
    }

    pub fn cached_plans(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .plans
            .len()
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.plans.clear();
        cache.inserted.clear();
    }

    fn caching(&self) -> bool {
        self.config.cache_plans && self.config.max_cached_plans > 0
    }
}

/// Hex SHA-256 of the document's canonical JSON text.
fn fingerprint(config: &serde_json::Value) -> String {
    let hash = Sha256::digest(config.to_string().as_bytes());
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}
