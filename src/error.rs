//! Typed errors for the extraction engine and its collaborators.

use thiserror::Error;

/// A locator expression that could not be compiled.
///
/// Never escapes the resolver: it is logged and the locator degrades to
/// "no match".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("invalid selector `{expression}`: {reason}")]
    InvalidSelector { expression: String, reason: String },

    #[error("invalid path expression `{expression}` at offset {offset}: {reason}")]
    InvalidPath {
        expression: String,
        offset: usize,
        reason: String,
    },
}

/// Template registration and lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// Lookup of an id that was never registered
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template `{0}` is already registered")]
    Duplicate(String),

    #[error("template `{template}` is invalid: {reason}")]
    Invalid { template: String, reason: String },

    #[error("failed to parse template definitions: {0}")]
    Parse(String),
}

/// Export codec failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures of the key-value persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value under `{key}` is malformed: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("storage serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("retention of {days} days is past the supported date range")]
    RetentionOutOfRange { days: i64 },
}

/// Settings validation failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting: {0}")]
    UnknownKey(String),

    #[error("invalid value for setting: {0}")]
    InvalidValue(#[from] serde_json::Error),

    #[error("setting `{key}` out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Crate-level error surfaced through the command interface.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("collector state lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;
