use std::path::Path;
use std::process;

use ruleform_eval::{Engine, EngineConfig};

use super::{print_json, read_json};
use crate::OutputFormat;

pub(crate) fn cmd_eval(
    rules_path: &Path,
    inputs_path: &Path,
    config: &EngineConfig,
    output: OutputFormat,
    quiet: bool,
) {
    let rules = read_json(rules_path, output, quiet);
    let inputs = read_json(inputs_path, output, quiet);

    let engine = Engine::with_config(config.clone());
    match engine.evaluate(&rules, &inputs) {
        Ok(result) => {
            if quiet {
                return;
            }
            match output {
                OutputFormat::Json => print_json(&result.to_json()),
                OutputFormat::Text => {
                    if result.results.is_empty() {
                        println!("no values produced");
                    }
                    for (name, value) in &result.results {
                        println!("{} = {}", name, value);
                    }
                }
            }
        }
        Err(e) => {
            if !quiet {
                match output {
                    OutputFormat::Json => eprintln!(
                        "{}",
                        serde_json::to_string_pretty(&e.to_json()).unwrap_or_default()
                    ),
                    OutputFormat::Text => eprintln!("evaluation error: {}", e),
                }
            }
            process::exit(1);
        }
    }
}
