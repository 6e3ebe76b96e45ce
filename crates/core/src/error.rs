use serde::{Deserialize, Serialize};

/// A syntax error in an expression or condition string.
///
/// `offset` is the character offset into the source text where the
/// problem was detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (at offset {offset})")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        ParseError {
            offset,
            message: message.into(),
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "message": self.message,
            "offset":  self.offset,
        })
    }
}

/// A structurally invalid rule document.
///
/// Raised while parsing, validating or resolving a document, always before
/// any formula executes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The top-level value is neither `{"formulas": [...]}` nor an array.
    #[error("document must be an object with a 'formulas' array, or an array of formulas")]
    NotADocument,

    /// A formula has no usable `id`.
    #[error("formula #{index} is missing a non-empty string 'id'")]
    MissingId { index: usize },

    /// No kind-defining field is present.
    #[error("formula '{id}' declares no kind: expected 'formula', 'switch'/'when' or 'scoring'")]
    UnknownKind { id: String },

    /// More than one kind-defining field is present.
    #[error("formula '{id}' is ambiguous: both '{first}' and '{second}' are set")]
    AmbiguousKind {
        id: String,
        first: String,
        second: String,
    },

    /// A `between` bound pair, score range or scoring tree is malformed.
    #[error("formula '{id}': malformed range at {path}: {message}")]
    MalformedRange {
        id: String,
        path: String,
        message: String,
    },

    /// A field has the wrong JSON shape.
    #[error("formula '{id}': invalid {path}: {message}")]
    InvalidField {
        id: String,
        path: String,
        message: String,
    },

    /// An expression or condition string failed to parse.
    #[error("formula '{id}': cannot parse {path}: {source}")]
    Parse {
        id: String,
        path: String,
        #[source]
        source: ParseError,
    },

    /// The formula graph has a cycle; `ids` lists one cycle in dependency order.
    #[error("cyclic dependency between formulas: {}", .ids.join(" -> "))]
    CyclicDependency { ids: Vec<String> },

    /// Several problems found by the validator.
    #[error("invalid document ({} errors): {}", .errors.len(), join_errors(.errors))]
    Invalid { errors: Vec<ConfigError> },
}

impl ConfigError {
    /// Collapse a list of problems: none is `None`, one surfaces as itself,
    /// several are wrapped in [`ConfigError::Invalid`].
    pub fn aggregate(mut errors: Vec<ConfigError>) -> Option<ConfigError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ConfigError::Invalid { errors }),
        }
    }

    /// The formula this error is attached to, when there is one.
    pub fn formula_id(&self) -> Option<&str> {
        match self {
            ConfigError::UnknownKind { id }
            | ConfigError::AmbiguousKind { id, .. }
            | ConfigError::MalformedRange { id, .. }
            | ConfigError::InvalidField { id, .. }
            | ConfigError::Parse { id, .. } => Some(id),
            _ => None,
        }
    }
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
