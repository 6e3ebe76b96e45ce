use std::path::Path;
use std::process;

use super::{print_json, read_json};
use crate::{report_error, OutputFormat};

pub(crate) fn cmd_order(rules_path: &Path, output: OutputFormat, quiet: bool) {
    let rules = read_json(rules_path, output, quiet);
    let plan = match ruleform_core::check(&rules).into_plan() {
        Ok(plan) => plan,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "document_id": plan.document_id,
            "order": plan.order(),
            "external_inputs": plan.external_inputs,
            "outputs": plan.outputs(),
        })),
        OutputFormat::Text => {
            println!("execution order:");
            for (i, f) in plan.formulas.iter().enumerate() {
                println!("  {}. {} ({})", i + 1, f.id, f.kind_name());
            }
            if plan.external_inputs.is_empty() {
                println!("external inputs: none");
            } else {
                println!("external inputs: {}", plan.external_inputs.join(", "));
            }
        }
    }
}
