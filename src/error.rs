//! Error handling module
//!
//! Error types for each stage of a run, plus the structured diagnostics that
//! the query builder and row scanner hand back instead of logging directly.

use crate::config::ConfigError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

/// Failure to sample one database target
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Failed to connect to database {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("Invalid connection settings for database {target}: {reason}")]
    Config { target: String, reason: String },
}

impl CollectError {
    pub fn target(&self) -> &str {
        match self {
            CollectError::Connect { target, .. } | CollectError::Config { target, .. } => target,
        }
    }
}

/// Snapshot file errors. All of them are fatal to the run.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read snapshot file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse snapshot file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize snapshots: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("Failed to write snapshot file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Metric backend errors
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to resolve metric backend credentials: {0}")]
    Credentials(String),

    #[error("Failed to push metric {metric} for database {database}: {reason}")]
    Put {
        database: String,
        metric: String,
        reason: String,
    },
}

/// Errors that stop a run
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Aborting run after target failure: {0}")]
    TargetFailed(#[from] CollectError),
}

/// Diagnostic severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// A non-fatal finding, routed to the log by whoever owns the I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Database identifier (or other scope) the finding belongs to
    pub context: String,
    pub message: String,
}

impl Diagnostic {
    pub fn info(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, context, message)
    }

    pub fn warning(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, context, message)
    }

    pub fn error(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, context, message)
    }

    fn new(severity: Severity, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            context: context.into(),
            message: message.into(),
        }
    }

    /// Write this diagnostic to the log at its severity
    pub fn emit(&self) {
        match self.severity {
            Severity::Info => info!(database = %self.context, "{}", self.message),
            Severity::Warning => warn!(database = %self.context, "{}", self.message),
            Severity::Error => error!(database = %self.context, "{}", self.message),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [{}] {}", self.severity, self.context, self.message)
    }
}
