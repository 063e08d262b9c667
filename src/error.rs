//! Error types for iptool.

use thiserror::Error;

/// Error type for iptool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid definition passed to the compiler API
    #[error("configuration error in `{argument}`: {reason}")]
    Config { argument: String, reason: String },

    /// Source data could not be ingested
    #[error("ingestion error in {origin} at row {row}: {reason}")]
    Ingest {
        origin: String,
        row: usize,
        reason: String,
    },

    /// Invalid database file magic bytes
    #[error("invalid magic bytes: expected DIT header")]
    InvalidMagic,

    /// Unsupported database format version
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// File ends before a section it declares
    #[error("truncated database: {section} needs {expected} bytes, {actual} available")]
    Truncated {
        section: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Structurally invalid database content
    #[error("corrupt database: {0}")]
    Corrupt(String),

    /// Malformed IPv4 address in a query
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Register not present in the database
    #[error("unknown register: {0}")]
    UnknownRegister(String),

    /// Reader failed at open time and cannot serve queries
    #[error("database unavailable: {0}")]
    ReaderFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn config(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Config {
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn ingest(origin: impl Into<String>, row: usize, reason: impl Into<String>) -> Self {
        Error::Ingest {
            origin: origin.into(),
            row,
            reason: reason.into(),
        }
    }

    /// Whether this error was raised while parsing or validating a database file.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidMagic
                | Error::UnsupportedVersion(_)
                | Error::Truncated { .. }
                | Error::Corrupt(_)
        )
    }
}

/// Result type alias for iptool operations.
pub type Result<T> = std::result::Result<T, Error>;
