//! Typed error hierarchy for the viewforge pipeline.
//!
//! Three top-level enums cover the three failure surfaces:
//! - `DbError`: driver-neutral database failure returned by a `Session`
//! - `ConnectionError`: session acquisition failures (fatal at run start)
//! - `PlanError`: invalid plan files and step selections
//!
//! `RunError` wraps the last two for the orchestrator's only fallible path.
//!
//! `ErrorKind` is the classification the step executor attaches to a failed
//! step. It is data, not an error: executor failures never propagate as `Err`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a database session, independent of the driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    /// The network connection is gone or could not be used.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected the statement with a SQLSTATE code.
    #[error("database error [{code}]: {message}")]
    Database { code: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl DbError {
    /// SQLSTATE code when the server reported one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            DbError::Database { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Whether a connection attempt that failed this way is worth retrying.
    ///
    /// Covers IO/refused connections, SQLSTATE class `08` (connection
    /// exception) and `57P03` (server starting up). Authentication and
    /// catalog errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Connection(_) => true,
            DbError::Database { code, .. } => code.starts_with("08") || code == "57P03",
            DbError::Other(msg) => {
                let m = msg.to_lowercase();
                m.contains("timeout") || m.contains("timed out") || m.contains("connection refused")
            }
        }
    }
}

/// Errors from acquiring a database session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not connect after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: DbError },

    #[error("connection failed with a non-retryable error: {0}")]
    Fatal(#[source] DbError),

    #[error("failed to apply session setting `{setting}`: {source}")]
    SessionSetup {
        setting: String,
        #[source]
        source: DbError,
    },
}

/// Errors from loading a plan or resolving a step selection.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("step ordinal {found} at position {position} breaks the 1..=N sequence")]
    OrdinalGap { position: usize, found: u32 },

    #[error("duplicate step name '{0}'")]
    DuplicateName(String),

    #[error("step {requested} is out of range (plan has steps 1..={total})")]
    StepOutOfRange { requested: u32, total: usize },

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("failed to read plan file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan file {path}: {message}")]
    Parse {
        path: std::path::PathBuf,
        message: String,
    },
}

/// Errors that end a pipeline run before any step executes.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Classification of a failed step, attached to its `ExecutionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Session was already closed when the step started.
    ConnectionClosed,
    /// Server closed the connection or the statement timed out.
    OperationalTimeout,
    /// Any other connection-level failure.
    OperationalOther,
    /// Constraint, syntax, permission and other server-reported errors.
    DatabaseError,
    Unexpected,
}

impl ErrorKind {
    /// Classify a session error.
    pub fn classify(err: &DbError) -> Self {
        if Self::looks_like_timeout(&err.to_string()) {
            return ErrorKind::OperationalTimeout;
        }
        match err {
            // 57014 = query_canceled, which is how statement_timeout surfaces
            DbError::Database { code, .. } if code == "57014" => ErrorKind::OperationalTimeout,
            DbError::Database { code, .. } if code.starts_with("08") || code.starts_with("57P") => {
                ErrorKind::OperationalOther
            }
            DbError::Database { .. } => ErrorKind::DatabaseError,
            DbError::Connection(_) => ErrorKind::OperationalOther,
            DbError::Other(_) => ErrorKind::Unexpected,
        }
    }

    fn looks_like_timeout(text: &str) -> bool {
        let t = text.to_lowercase();
        t.contains("server closed the connection")
            || t.contains("connection closed")
            || t.contains("timeout")
            || t.contains("timed out")
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionClosed => "connection_closed",
            ErrorKind::OperationalTimeout => "operational_timeout",
            ErrorKind::OperationalOther => "operational_other",
            ErrorKind::DatabaseError => "database_error",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
