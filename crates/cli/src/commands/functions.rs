use std::process;

use ruleform_eval::{Category, FunctionMeta, FunctionRegistry};

use super::print_json;
use crate::{report_error, OutputFormat};

pub(crate) fn cmd_functions(category: Option<&str>, output: OutputFormat, quiet: bool) {
    let registry = FunctionRegistry::with_builtins();
    let functions = match category {
        None => registry.list(),
        Some(name) => match Category::from_name(name) {
            Some(c) => registry.by_category(c),
            None => {
                let msg = format!(
                    "error: unknown category '{}' (expected math, statistics, business, date or utility)",
                    name
                );
                report_error(&msg, output, quiet);
                process::exit(1);
            }
        },
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => match serde_json::to_value(&functions) {
            Ok(json) => print_json(&json),
            Err(e) => eprintln!("serialization error: {}", e),
        },
        OutputFormat::Text => {
            let width = functions.iter().map(|f| f.name.len()).max().unwrap_or(0);
            for f in &functions {
                println!(
                    "{:width$}  {:10}  {:6}  {}",
                    f.name,
                    f.category.name(),
                    arity(f),
                    f.description,
                    width = width
                );
            }
        }
    }
}

fn arity(meta: &FunctionMeta) -> String {
    match meta.max_args {
        Some(max) if max == meta.min_args => meta.min_args.to_string(),
        Some(max) => format!("{}-{}", meta.min_args, max),
        None => format!("{}+", meta.min_args),
    }
}
