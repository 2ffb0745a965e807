// Error types for the bulk sync engine.
//
// ValidationError rejects a whole batch before any request goes out. Everything
// else is per item: the executor wraps it in ItemError, reports it, and moves on.

use std::path::PathBuf;

use thiserror::Error;

/// A batch was rejected before any device I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid range {from}-{to}: start must not exceed end")]
    InvertedRange { from: u32, to: u32 },

    #[error("{axis} {index} out of bounds (valid: 1-{max})")]
    OutOfBounds {
        axis: &'static str,
        index: u32,
        max: u32,
    },

    #[error("could not parse range '{0}' (expected N or A-B)")]
    BadRangeSyntax(String),

    #[error("template '{template}' needs a {axis} index but the batch has no {axis} range")]
    MissingAxis {
        template: &'static str,
        axis: &'static str,
    },

    #[error("page '{0}' has no {1} axis")]
    UnsupportedAxis(&'static str, &'static str),
}

/// A template placeholder had no index to bind to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pattern '{pattern}' has a '{placeholder}' placeholder but no value was supplied")]
pub struct ResolveError {
    pub pattern: &'static str,
    pub placeholder: char,
}

/// The request never produced a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
}

/// The response body did not carry an integer `value`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("response has no 'value' field")]
    MissingValue,

    #[error("value {0} is not an integer")]
    NotInteger(String),
}

/// A decoded value fell outside the template's declared domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value {value} outside {expected}")]
pub struct DomainError {
    pub value: i64,
    pub expected: String,
}

/// Everything that can go wrong with a single batch item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ItemError {
    /// Short tag used in the results table.
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::Transport(_) => "transport",
            ItemError::Decode(_) => "decode",
            ItemError::Domain(_) => "domain",
        }
    }
}

/// Errors reading or writing the local settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write settings '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A CLI parameter or group name did not pick out exactly one entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no {kind} matching '{input}' on page {page}")]
    NotFound {
        kind: &'static str,
        input: String,
        page: &'static str,
    },

    #[error("ambiguous {kind} '{input}'. Matches: {}", matches.join(", "))]
    Ambiguous {
        kind: &'static str,
        input: String,
        matches: Vec<&'static str>,
    },
}
