use std::path::Path;
use std::process;

use ruleform_codegen::GenerateOptions;

use super::{print_json, read_json};
use crate::{report_error, OutputFormat};

pub(crate) fn cmd_generate(
    rules_path: &Path,
    opts: &GenerateOptions,
    out: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let rules = read_json(rules_path, output, quiet);
    let generated = match ruleform_codegen::generate(&rules, opts) {
        Ok(g) => g,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    if let Some(path) = out {
        if let Err(e) = generated.write(path) {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
        if quiet {
            return;
        }
        match output {
            OutputFormat::Json => match serde_json::to_value(&generated.metadata) {
                Ok(meta) => print_json(&serde_json::json!({
                    "path": path.display().to_string(),
                    "metadata": meta,
                })),
                Err(e) => eprintln!("serialization error: {}", e),
            },
            OutputFormat::Text => println!(
                "wrote {} ({} formula(s), entry point `{}`)",
                path.display(),
                generated.metadata.formula_count,
                generated.metadata.function_name
            ),
        }
        return;
    }

    // Without --out the code itself is the result, so --quiet does not hide it.
    match output {
        OutputFormat::Text => print!("{}", generated.code),
        OutputFormat::Json => match serde_json::to_value(&generated.metadata) {
            Ok(meta) => print_json(&serde_json::json!({
                "code": generated.code,
                "metadata": meta,
            })),
            Err(e) => eprintln!("serialization error: {}", e),
        },
    }
}
