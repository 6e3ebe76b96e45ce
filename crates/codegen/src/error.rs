use ruleform_core::ConfigError;

/// Error type for code generation operations.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// The document is invalid; nothing was generated.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A construct has no translation for the requested backend.
    #[error("formula '{formula}': cannot generate code for {construct}")]
    UnsupportedConstruct { formula: String, construct: String },

    /// `function_name` is not a valid Rust identifier.
    #[error("invalid function name '{0}'")]
    InvalidFunctionName(String),

    /// An I/O error occurred while writing generated files.
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CodegenError {
    pub(crate) fn unsupported(formula: &str, construct: impl Into<String>) -> Self {
        CodegenError::UnsupportedConstruct {
            formula: formula.to_owned(),
            construct: construct.into(),
        }
    }
}
