//! Identifier validation for generated SQL
//!
//! Marker tables and keys come from module descriptors, but they are still
//! spliced into SQL text, so every identifier is validated and then quoted.

use schemig_core::{StoreError, StoreResult};

/// PostgreSQL truncates identifiers longer than this
const MAX_IDENTIFIER_LEN: usize = 63;

/// Escape a SQL identifier (table name, column name, etc.)
///
/// ```
/// use schemig_store::security::escape_identifier;
///
/// assert_eq!(escape_identifier("schema_version"), "\"schema_version\"");
/// assert_eq!(escape_identifier("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn escape_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Validate that an identifier is a plain, unquoted-safe name
pub fn validate_identifier(identifier: &str) -> StoreResult<()> {
    let mut chars = identifier.chars();
    let first = chars
        .next()
        .ok_or_else(|| StoreError::InvalidIdentifier("identifier cannot be empty".to_string()))?;

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(StoreError::InvalidIdentifier(format!(
            "'{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LEN
        )));
    }

    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(StoreError::InvalidIdentifier(format!(
            "'{}' must start with a letter or underscore",
            identifier
        )));
    }

    if let Some(c) = identifier
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(StoreError::InvalidIdentifier(format!(
            "'{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    Ok(())
}

/// Validate and quote in one go
pub fn quoted_identifier(identifier: &str) -> StoreResult<String> {
    validate_identifier(identifier)?;
    Ok(escape_identifier(identifier))
}
