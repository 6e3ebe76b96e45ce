//! `ruleform.toml`: optional settings shared by every subcommand.
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [engine]
//! cache_plans = true
//! max_cached_plans = 64
//!
//! [codegen]
//! function_name = "evaluate_rules"
//! include_comments = false
//! optimization_level = "aggressive"
//! ```
//!
//! Command-line flags override anything read here.

use std::path::Path;

use ruleform_codegen::GenerateOptions;
use ruleform_eval::EngineConfig;
use serde::Deserialize;

const DEFAULT_FILE: &str = "ruleform.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Settings {
    pub log: LogSettings,
    pub engine: EngineConfig,
    pub codegen: GenerateOptions,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LogSettings {
    /// An `EnvFilter` directive.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            level: "warn".into(),
        }
    }
}

/// Read settings from `path`, or from `./ruleform.toml` when no path is
/// given. A missing default file yields the defaults; a missing explicit
/// file is an error.
pub(crate) fn load(path: Option<&Path>) -> Result<Settings, String> {
    let (path, required) = match path {
        Some(p) => (p, true),
        None => (Path::new(DEFAULT_FILE), false),
    };
    if !required && !path.exists() {
        return Ok(Settings::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading settings '{}': {}", path.display(), e))?;
    parse(&text).map_err(|e| format!("error in settings '{}': {}", path.display(), e))
}

fn parse(text: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleform_codegen::OptimizationLevel;

    #[test]
    fn empty_file_gives_defaults() {
        let s = parse("").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.log.level, "warn");
        assert!(s.engine.cache_plans);
        assert_eq!(s.codegen.function_name, "evaluate_rules");
    }

    #[test]
    fn sections_are_partial() {
        let s = parse(
            r#"
            [engine]
            max_cached_plans = 4

            [codegen]
            optimization_level = "aggressive"
            "#,
        )
        .unwrap();
        assert!(s.engine.cache_plans);
        assert_eq!(s.engine.max_cached_plans, 4);
        assert_eq!(s.codegen.optimization_level, OptimizationLevel::Aggressive);
        assert!(!s.codegen.include_comments);
        assert_eq!(s.log, LogSettings::default());
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(parse("[server]\nport = 1").is_err());
        assert!(parse("[log]\nlevle = \"info\"").is_err());
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load(Some(&missing)).unwrap_err();
        assert!(err.contains("nope.toml"), "{}", err);

        let present = dir.path().join("ruleform.toml");
        std::fs::write(&present, "[log]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(load(Some(&present)).unwrap().log.level, "debug");
    }
}
