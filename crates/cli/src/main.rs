mod commands;
mod settings;
mod telemetry;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use ruleform_codegen::OptimizationLevel;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Declarative JSON rule engine.
#[derive(Parser)]
#[command(name = "ruleform", version, about = "Declarative JSON rule engine")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Settings file (defaults to ./ruleform.toml when present)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `ruleform_eval=trace`; RUST_LOG wins
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a rule document against a JSON object of inputs
    Eval {
        /// Path to the rule document
        rules: PathBuf,
        /// Path to the inputs JSON object
        #[arg(long)]
        inputs: PathBuf,
    },

    /// Check a rule document and report errors and warnings
    Validate {
        /// Path to the rule document
        rules: PathBuf,
    },

    /// Show the execution order and the inputs a document needs
    Order {
        /// Path to the rule document
        rules: PathBuf,
    },

    /// Generate a standalone Rust module from a rule document
    Generate {
        /// Path to the rule document
        rules: PathBuf,
        /// Name of the generated entry point
        #[arg(long)]
        function_name: Option<String>,
        /// Emit a comment naming each formula
        #[arg(long)]
        comments: bool,
        /// Optimization level (basic or aggressive)
        #[arg(long)]
        optimize: Option<OptimizationLevel>,
        /// Write the module here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List the built-in functions
    Functions {
        /// Only list one category (math, statistics, business, date, utility)
        #[arg(long)]
        category: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let settings = match settings::load(cli.settings.as_deref()) {
        Ok(s) => s,
        Err(msg) => {
            report_error(&msg, cli.output, cli.quiet);
            process::exit(1);
        }
    };

    let level = match (&cli.log_level, cli.quiet) {
        (Some(level), _) => level.as_str(),
        (None, true) => "off",
        (None, false) => settings.log.level.as_str(),
    };
    if let Err(e) = telemetry::init(level) {
        report_error(&format!("error: {}", e), cli.output, cli.quiet);
        process::exit(1);
    }

    match cli.command {
        Commands::Eval { rules, inputs } => {
            commands::eval::cmd_eval(&rules, &inputs, &settings.engine, cli.output, cli.quiet);
        }
        Commands::Validate { rules } => {
            commands::validate::cmd_validate(&rules, cli.output, cli.quiet);
        }
        Commands::Order { rules } => {
            commands::order::cmd_order(&rules, cli.output, cli.quiet);
        }
        Commands::Generate {
            rules,
            function_name,
            comments,
            optimize,
            out,
        } => {
            let mut opts = settings.codegen.clone();
            if let Some(name) = function_name {
                opts.function_name = name;
            }
            if comments {
                opts.include_comments = true;
            }
            if let Some(level) = optimize {
                opts.optimization_level = level;
            }
            commands::generate::cmd_generate(&rules, &opts, out.as_deref(), cli.output, cli.quiet);
        }
        Commands::Functions { category } => {
            commands::functions::cmd_functions(category.as_deref(), cli.output, cli.quiet);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
