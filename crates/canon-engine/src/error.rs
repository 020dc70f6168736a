//! Error taxonomy for loading, checking, overriding and persisting

use std::path::PathBuf;

use canon_types::Category;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Malformed rule definitions or a dependency cycle. Fatal at load: no partial
/// RuleSet is ever produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Failed to parse rule source '{source_name}': {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Rule #{index} in '{source_name}' is missing field '{field}'")]
    MissingField {
        source_name: String,
        index: usize,
        field: &'static str,
    },

    #[error("Rule '{rule}' has unknown {field} '{value}'")]
    UnknownValue {
        rule: String,
        field: &'static str,
        value: String,
    },

    #[error("Rule id '{0}' is not of the form namespace:section:seq")]
    InvalidId(String),

    #[error("Duplicate rule id '{0}'")]
    DuplicateId(String),

    #[error("Rule '{rule}' depends on unknown rule '{dependency}'")]
    UnknownDependency { rule: String, dependency: String },

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Rule '{rule}' has invalid parameters for checker '{check_type}': {reason}")]
    InvalidParameters {
        rule: String,
        check_type: String,
        reason: String,
    },

    #[error("Rule '{rule}' has an exception that binds no scope field")]
    UnboundException { rule: String },
}

/// Why a single checker invocation could not produce a verdict
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckerError {
    #[error("Checker '{0}' is not registered")]
    UnknownChecker(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Checker timeout after {0}ms")]
    Timeout(u64),

    #[error("Checker panicked: {0}")]
    Panicked(String),

    #[error("Checker cancelled")]
    Cancelled,

    #[error("Checker failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record in {} at line {line}: {reason}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            StorageError::Unavailable(_) => true,
            StorageError::Corrupt { .. } | StorageError::Serialize(_) => false,
        }
    }
}

/// Override request rejected. The rule's failure is unaffected.
#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("Unknown rule '{0}'")]
    UnknownRule(String),

    #[error("Principal '{approver}' lacks {category} authority to override '{rule}'")]
    Authority {
        approver: String,
        category: Category,
        rule: String,
    },

    #[error("Override expiry {expiry} is not after {now}")]
    InvalidExpiry {
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Override justification must not be empty")]
    MissingJustification,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Evaluation cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Resolving and loading the active RuleSet
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("No ruleset matches version '{requested}' (current is {current})")]
    UnknownRuleset { requested: String, current: String },
}
