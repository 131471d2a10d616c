//! Error types for gridxfer
//!
//! Run-level failures (unusable tool, expired credentials, worker pool
//! faults) abort the whole run and map onto distinct process exit codes.
//! Per-pair transfer failures never abort a run; they are described by
//! [`TransferError`] and folded into the section report instead.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for gridxfer operations
#[derive(Error, Debug)]
pub enum GridXferError {
    /// I/O error while touching a local path
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external copy tool is missing or failed the capability probe
    #[error("Unable to use copy tool '{path}': {reason}")]
    ToolUnusable { path: PathBuf, reason: String },

    /// The grid proxy has too little lifetime left
    #[error("Too little time left on grid proxy: {remaining} s (need more than {required} s)")]
    CredentialExpired { remaining: i64, required: i64 },

    /// The proxy-info program could not be run or parsed
    #[error("Error while executing '{path}': {message}")]
    ProxyInfoFailed { path: PathBuf, message: String },

    /// Worker threads could not be created
    #[error("Error while creating worker threads: {0}")]
    ThreadPool(String),

    /// Internal queue fault (poisoned lock, closed channel)
    #[error("Work queue fault: {0}")]
    Queue(String),

    /// Waiting for workers to exit failed
    #[error("While waiting for threads to exit: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifest parsing error
    #[error("Manifest error at line {line}: {message}")]
    Manifest { line: usize, message: String },

    /// Arbitration table could not be loaded
    #[error("Arbitration table error: {0}")]
    ArbitrationTable(String),
}

impl GridXferError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a tool-unusable error
    pub fn tool(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ToolUnusable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a manifest error bound to a line number
    pub fn manifest(line: usize, message: impl Into<String>) -> Self {
        Self::Manifest {
            line,
            message: message.into(),
        }
    }

    /// Create a queue fault
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Process exit code for a run aborted by this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ToolUnusable { .. } => 2,
            Self::CredentialExpired { .. } | Self::ProxyInfoFailed { .. } => 3,
            Self::ThreadPool(_) => 4,
            Self::Queue(_) => 6,
            Self::Shutdown(_) => 7,
            Self::Io { .. }
            | Self::Config(_)
            | Self::Manifest { .. }
            | Self::ArbitrationTable(_) => 1,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. }
            | Self::ToolUnusable { path, .. }
            | Self::ProxyInfoFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for gridxfer operations
pub type Result<T> = std::result::Result<T, GridXferError>;

impl From<std::io::Error> for GridXferError {
    fn from(err: std::io::Error) -> Self {
        GridXferError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for GridXferError {
    fn from(err: serde_json::Error) -> Self {
        GridXferError::ArbitrationTable(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for GridXferError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        GridXferError::Queue(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| GridXferError::io(path, e))
    }
}

/// Failure of one (source, destination) pair after arbitration
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferError {
    /// Retryable failure; only surfaces once attempts are exhausted
    #[error("soft error, retries exhausted")]
    Soft,

    /// Non-retryable failure (exec failure, signal, credentials)
    #[error("hard error")]
    Hard,

    /// The source replica does not exist
    #[error("missing source file")]
    MissingSource,

    /// The destination server refused connections
    #[error("destination server down")]
    ServerDown,
}
