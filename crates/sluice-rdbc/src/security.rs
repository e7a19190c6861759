//! Identifier validation and literal escaping.
//!
//! Table, schema and column names are interpolated into generated SQL, so
//! configuration rejects anything that is not a plain identifier. Catalog
//! queries embed table and schema names as string literals and escape them.

use crate::error::Error;

/// Maximum identifier length accepted
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Validate a SQL identifier (table, schema or column name).
///
/// Rules:
/// - Must not be empty
/// - At most [`MAX_IDENTIFIER_LEN`] characters
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters, underscores and `$`
///
/// # Examples
///
/// ```
/// use sluice_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("orders").is_ok());
/// assert!(validate_sql_identifier("txn_id").is_ok());
/// assert!(validate_sql_identifier("x; DROP TABLE orders--").is_err());
/// assert!(validate_sql_identifier("1st").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max {})",
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$')) {
        return Err(Error::config(format!(
            "Invalid SQL identifier '{}': contains invalid character '{}'",
            name, c
        )));
    }

    Ok(())
}

/// Escape a value for a single-quoted SQL string literal.
///
/// ```
/// use sluice_rdbc::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("orders"), "orders");
/// assert_eq!(escape_string_literal("o'brien"), "o''brien");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}
