//! ruleform-codegen: compiles rule documents ahead of time.
//!
//! Two backends share one lowered form of the execution plan:
//!
//! - [`generate`] emits a self-contained Rust module whose entry point
//!   reproduces the interpreter's results for any input.
//! - [`compile`] builds an in-process closure program with the same
//!   semantics, used where a build step is not available.

pub mod closure;
pub mod error;
pub mod ir;
pub mod optimize;
pub mod prelude;
pub mod rust;

use std::path::Path;

use ruleform_core::check;
use ruleform_eval::FunctionRegistry;
use serde::{Deserialize, Serialize};

pub use closure::CompiledRules;
pub use error::CodegenError;
pub use optimize::OptimizationLevel;

/// Options for both backends. Also the `[codegen]` section of the CLI
/// settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    /// Entry-point identifier of the generated module.
    pub function_name: String,
    /// Emit a comment naming each source formula.
    pub include_comments: bool,
    pub optimization_level: OptimizationLevel,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            function_name: "evaluate_rules".into(),
            include_comments: false,
            optimization_level: OptimizationLevel::Basic,
        }
    }
}

/// Generated source plus a description of it.
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub code: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub function_name: String,
    pub document_id: Option<String>,
    pub formula_count: usize,
    /// Formula ids in execution order.
    pub order: Vec<String>,
    pub external_inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Functions called by the document, sorted.
    pub functions: Vec<String>,
    pub optimization_level: OptimizationLevel,
}

impl GeneratedCode {
    /// Write the source to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<(), CodegenError> {
        std::fs::write(path, &self.code).map_err(|source| CodegenError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Generate a standalone Rust module for `config`.
///
/// Fails with [`CodegenError::UnsupportedConstruct`] when the document calls
/// a function with no source translation; nothing partial is returned.
pub fn generate(
    config: &serde_json::Value,
    opts: &GenerateOptions,
) -> Result<GeneratedCode, CodegenError> {
    rust::check_function_name(&opts.function_name)?;
    let plan = check(config).into_plan()?;
    let mut program = ir::lower(&plan)?;
    let registry = FunctionRegistry::with_builtins();
    optimize::optimize(&mut program, &registry, opts.optimization_level);

    let code = rust::emit(
        &program,
        &registry,
        &rust::EmitOptions {
            function_name: &opts.function_name,
            include_comments: opts.include_comments,
            level: opts.optimization_level,
        },
    )?;
    tracing::info!(
        function = %opts.function_name,
        formulas = program.units.len(),
        bytes = code.len(),
        "generated rust source"
    );

    let metadata = Metadata {
        function_name: opts.function_name.clone(),
        document_id: program.document_id.clone(),
        formula_count: program.units.len(),
        order: plan.order().into_iter().map(str::to_owned).collect(),
        external_inputs: program.external_inputs.clone(),
        outputs: program.outputs.clone(),
        functions: program.functions.clone(),
        optimization_level: opts.optimization_level,
    };
    Ok(GeneratedCode { code, metadata })
}

/// Compile `config` into closures bound to `registry`. Every registered
/// function is supported, custom ones included.
pub fn compile(
    config: &serde_json::Value,
    registry: &FunctionRegistry,
    opts: &GenerateOptions,
) -> Result<CompiledRules, CodegenError> {
    let plan = check(config).into_plan()?;
    let mut program = ir::lower(&plan)?;
    optimize::optimize(&mut program, registry, opts.optimization_level);
    tracing::debug!(formulas = program.units.len(), "compiled rule closures");
    Ok(closure::build(&program, registry))
}
