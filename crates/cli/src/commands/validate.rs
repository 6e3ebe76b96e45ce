use std::path::Path;
use std::process;

use super::{print_json, read_json};
use crate::OutputFormat;

pub(crate) fn cmd_validate(rules_path: &Path, output: OutputFormat, quiet: bool) {
    let rules = read_json(rules_path, output, quiet);
    let report = ruleform_core::validate(&rules);

    if !quiet {
        match output {
            OutputFormat::Json => match serde_json::to_value(&report) {
                Ok(json) => print_json(&json),
                Err(e) => eprintln!("serialization error: {}", e),
            },
            OutputFormat::Text => {
                if report.valid {
                    println!("valid");
                } else {
                    eprintln!("invalid");
                    for err in &report.errors {
                        eprintln!("  - {}", err);
                    }
                }
                for warning in &report.warnings {
                    eprintln!("warning: {}", warning);
                }
            }
        }
    }

    if !report.valid {
        process::exit(1);
    }
}
