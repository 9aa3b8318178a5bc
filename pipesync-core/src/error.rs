//! Error types for pipesync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Faults raised while building or inspecting a pipeline document.
///
/// Every variant is a parse-class fault: the document cannot be reconciled.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The input text is not valid YAML.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A mapping key is itself a mapping or sequence.
    #[error("unsupported non-scalar mapping key at {path}")]
    UnsupportedKey { path: String },

    /// `spec.tasks` or `spec.finally` is present but is not a sequence of mappings.
    #[error("malformed task list at {path}: {reason}")]
    MalformedTaskList { path: String, reason: String },

    /// A task element has no string `name`.
    #[error("task #{index} in {list} has no name")]
    UnnamedTask { list: String, index: usize },

    /// Two tasks share a name within one document.
    #[error("duplicate task name '{name}'")]
    DuplicateTask { name: String },

    /// A textual path could not be parsed.
    #[error("invalid path '{input}': {reason}")]
    InvalidPath { input: String, reason: String },

    /// A `taskRef` subtree is not in a recognised shape.
    #[error("invalid task reference: {reason}")]
    InvalidTaskRef { reason: String },
}

/// Errors from loading the sync configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with file path and serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// A missing-task mode string was not recognised.
    #[error("unknown missing-task mode '{0}'; expected: skip, auto-patch, refresh-bundles, both")]
    InvalidMode(String),

    /// The config parsed but is semantically unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}
