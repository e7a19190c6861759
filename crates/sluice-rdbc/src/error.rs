//! Error types for sluice-rdbc
//!
//! Errors are classified so callers can tell a dead connection from a bad row:
//! - Connection-level errors (connection, timeout, transaction)
//! - Row-level errors (constraint violations, type conversion)
//! - Setup errors (configuration, schema)

use std::fmt;
use thiserror::Error;

/// Result type for sluice-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors
    Connection,
    /// Query execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Constraint violation
    Constraint,
    /// Type conversion errors
    TypeConversion,
    /// Timeout errors
    Timeout,
    /// Configuration error
    Configuration,
    /// Schema-related errors
    Schema,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category concern a single row rather than the session
    #[inline]
    pub const fn is_row_level(self) -> bool {
        matches!(self, Self::Constraint | Self::TypeConversion | Self::Query)
    }
}

/// Kind of integrity constraint that was violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// NOT NULL column received a null
    NotNull,
    /// Unique or primary key collision
    Unique,
    /// Foreign key reference missing
    ForeignKey,
    /// CHECK constraint failed
    Check,
    /// Anything else the driver reports as an integrity violation
    Other,
}

/// Main error type for sluice-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed or was lost
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction begin/commit/rollback failed
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Constraint violation (not null, unique, fk, check)
    #[error("constraint violation ({kind:?}): {message}")]
    Constraint {
        kind: ConstraintKind,
        constraint_name: Option<String>,
        message: String,
    },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Schema error (table not found, column mismatch)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Table not found
    #[error("table not found: {table}")]
    TableNotFound { table: String },

    /// Column not found
    #[error("column not found: {column} in table {table}")]
    ColumnNotFound { table: String, column: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Schema { .. } | Self::TableNotFound { .. } | Self::ColumnNotFound { .. } => {
                ErrorCategory::Schema
            }
            Self::Unsupported { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error concerns a single row
    #[inline]
    pub fn is_row_level(&self) -> bool {
        self.category().is_row_level()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a constraint violation
    pub fn constraint(kind: ConstraintKind, message: impl Into<String>) -> Self {
        Self::Constraint {
            kind,
            constraint_name: None,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Map a five character SQLSTATE code onto an error.
    ///
    /// Class 23 becomes [`Error::Constraint`], class 22 becomes
    /// [`Error::TypeConversion`], class 08 becomes [`Error::Connection`] and
    /// everything else is reported as a query error against `sql`.
    pub fn from_sqlstate(code: &str, message: impl Into<String>, sql: Option<&str>) -> Self {
        let message = message.into();
        match code {
            "23502" => Self::constraint(ConstraintKind::NotNull, message),
            "23505" => Self::constraint(ConstraintKind::Unique, message),
            "23503" => Self::constraint(ConstraintKind::ForeignKey, message),
            "23514" => Self::constraint(ConstraintKind::Check, message),
            c if c.starts_with("23") => Self::constraint(ConstraintKind::Other, message),
            c if c.starts_with("22") => Self::type_conversion(message),
            c if c.starts_with("08") => Self::connection(message),
            "57014" => Self::timeout(message),
            _ => Self::Query {
                message,
                sql: sql.map(String::from),
                source: None,
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Constraint => write!(f, "constraint"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Schema => write!(f, "schema"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_level_categories() {
        assert!(ErrorCategory::Constraint.is_row_level());
        assert!(ErrorCategory::TypeConversion.is_row_level());
        assert!(ErrorCategory::Query.is_row_level());

        assert!(!ErrorCategory::Connection.is_row_level());
        assert!(!ErrorCategory::Transaction.is_row_level());
        assert!(!ErrorCategory::Schema.is_row_level());
    }

    #[test]
    fn test_from_sqlstate() {
        assert!(matches!(
            Error::from_sqlstate("23502", "null value in column", None),
            Error::Constraint {
                kind: ConstraintKind::NotNull,
                ..
            }
        ));
        assert!(matches!(
            Error::from_sqlstate("23505", "duplicate key value", None),
            Error::Constraint {
                kind: ConstraintKind::Unique,
                ..
            }
        ));
        assert!(matches!(
            Error::from_sqlstate("22007", "invalid datetime format", None),
            Error::TypeConversion { .. }
        ));
        assert!(matches!(
            Error::from_sqlstate("08006", "connection failure", None),
            Error::Connection { .. }
        ));

        let err = Error::from_sqlstate("42601", "syntax error", Some("INSERT INTO"));
        assert_eq!(err.category(), ErrorCategory::Query);
        assert!(matches!(err, Error::Query { sql: Some(ref s), .. } if s == "INSERT INTO"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::query_with_sql("syntax error", "SELECT * FORM users");
        assert!(err.to_string().contains("syntax error"));

        let err = Error::constraint(ConstraintKind::Unique, "duplicate key");
        assert!(err.to_string().contains("Unique"));
    }
}
