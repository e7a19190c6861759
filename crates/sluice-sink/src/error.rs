//! Error types for sluice-sink
//!
//! Provides structured error handling for the sink runtime:
//! - `SinkError`: every failure surfaced by `open`/`write`/`snapshot_state`/`close`
//! - `RecordError`: a failure confined to a single record
//! - `ErrorKind`: the closed classification of record failures used for counters

use std::fmt;
use thiserror::Error;

use sluice_rdbc::error::{ConstraintKind, Error as RdbcError};

/// Result type alias for sink operations
pub type Result<T> = std::result::Result<T, SinkError>;

/// Classification of a failed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A NOT NULL column received no value
    NullValue,
    /// The record collided with an existing unique key
    DuplicateKey,
    /// A field could not be converted to the column type
    Conversion,
    /// Anything else
    Other,
}

impl ErrorKind {
    /// All kinds, in counter order
    pub const ALL: [ErrorKind; 4] = [
        ErrorKind::NullValue,
        ErrorKind::DuplicateKey,
        ErrorKind::Conversion,
        ErrorKind::Other,
    ];

    /// Classify a driver error.
    ///
    /// Typed constraint and conversion errors are mapped directly; untyped
    /// query errors fall back to the driver message.
    pub fn classify(err: &RdbcError) -> Self {
        match err {
            RdbcError::TypeConversion { .. } => Self::Conversion,
            RdbcError::Constraint {
                kind: ConstraintKind::NotNull,
                ..
            } => Self::NullValue,
            RdbcError::Constraint {
                kind: ConstraintKind::Unique,
                ..
            } => Self::DuplicateKey,
            RdbcError::Query { message, .. } => Self::classify_message(message),
            _ => Self::Other,
        }
    }

    /// Classify from a driver message when no SQLSTATE is available
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("duplicate") || lower.contains("unique constraint") {
            Self::DuplicateKey
        } else if lower.contains("null value")
            || lower.contains("cannot be null")
            || lower.contains("not-null")
            || lower.contains("cannot insert the value null")
        {
            Self::NullValue
        } else if lower.contains("invalid input syntax") || lower.contains("incorrect") {
            Self::Conversion
        } else {
            Self::Other
        }
    }

    /// Name of the per-kind error counter
    pub const fn counter_name(self) -> &'static str {
        match self {
            Self::NullValue => crate::metrics::NUM_NULL_ERRORS,
            Self::DuplicateKey => crate::metrics::NUM_DUPLICATE_ERRORS,
            Self::Conversion => crate::metrics::NUM_CONVERSION_ERRORS,
            Self::Other => crate::metrics::NUM_OTHER_ERRORS,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullValue => write!(f, "null_value"),
            Self::DuplicateKey => write!(f, "duplicate_key"),
            Self::Conversion => write!(f, "conversion"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A failure confined to one record
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} error: {message}")]
pub struct RecordError {
    /// Classification
    pub kind: ErrorKind,
    /// Zero-based position of the offending field, when known
    pub column: Option<usize>,
    /// Driver or conversion message
    pub message: String,
}

impl RecordError {
    /// Create a record error without a field position
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            column: None,
            message: message.into(),
        }
    }

    /// Conversion failure at field `column`
    pub fn conversion(column: usize, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Conversion,
            column: Some(column),
            message: message.into(),
        }
    }

    /// Attach the field position
    pub fn at_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }
}

/// Errors surfaced by the sink runtime
#[derive(Debug, Error)]
pub enum SinkError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Target unreachable or connection lost
    #[error("connection error: {0}")]
    Connection(String),

    /// Table, column or key resolution failed
    #[error("schema error: {0}")]
    Schema(String),

    /// A single record failed
    #[error("record error: {0}")]
    Record(RecordError),

    /// The error budget was exhausted
    #[error("error threshold exceeded: {message}")]
    ThresholdExceeded {
        /// Threshold description plus the last record diagnostic
        message: String,
    },

    /// Commit or rollback failed
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Task-state or counter lookup failed
    #[error("monitor error: {0}")]
    Monitor(String),

    /// Error raised by the database layer
    #[error(transparent)]
    Rdbc(#[from] RdbcError),
}

impl SinkError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a monitor error
    pub fn monitor(msg: impl Into<String>) -> Self {
        Self::Monitor(msg.into())
    }

    /// The record-level view of this error, `None` when it is fatal.
    ///
    /// Lost connections and transaction failures are never record errors.
    pub fn record_error(&self) -> Option<RecordError> {
        match self {
            Self::Record(r) => Some(r.clone()),
            Self::Rdbc(e) if e.is_row_level() => {
                Some(RecordError::new(ErrorKind::classify(e), e.to_string()))
            }
            _ => None,
        }
    }

    /// Whether this error must abort the task
    pub fn is_fatal(&self) -> bool {
        self.record_error().is_none()
    }
}

impl From<RecordError> for SinkError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

impl From<validator::ValidationErrors> for SinkError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Config(e.to_string())
    }
}
