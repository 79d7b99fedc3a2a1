//! Migration script loading and statement splitting

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use std::fs;
use std::path::Path;

use schemig_core::{StoreError, StoreResult};

/// Read a script's body from disk
pub fn read_script(path: &Path) -> StoreResult<String> {
    fs::read_to_string(path).map_err(|source| StoreError::Script {
        path: path.to_path_buf(),
        source,
    })
}

/// Split a script into statements at top-level semicolons.
///
/// Each statement is a slice of the script as written: comments and
/// dollar-quoted bodies are kept, only comments and blank lines between
/// statements are dropped. A script the tokenizer rejects is sent as a
/// single statement.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let tokens = match Tokenizer::new(&PostgreSqlDialect {}, sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!("SQL tokenizing failed, executing script as one statement: {}", e);
            let body = sql.trim();
            return if body.is_empty() { Vec::new() } else { vec![body.to_string()] };
        }
    };

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    let mut statements = Vec::new();
    let mut start: Option<usize> = None;
    for token in &tokens {
        match token.token {
            Token::Whitespace(_) | Token::EOF => {}
            Token::SemiColon => {
                if let Some(begin) = start.take() {
                    let end = byte_offset(sql, &line_starts, token.location);
                    statements.push(sql[begin..end].trim_end().to_string());
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(byte_offset(sql, &line_starts, token.location));
                }
            }
        }
    }
    if let Some(begin) = start {
        statements.push(sql[begin..].trim_end().to_string());
    }
    statements
}

/// Tokenizer locations are 1-based lines and character columns
fn byte_offset(sql: &str, line_starts: &[usize], location: Location) -> usize {
    let line = usize::try_from(location.line.saturating_sub(1)).unwrap_or(usize::MAX);
    let column = usize::try_from(location.column.saturating_sub(1)).unwrap_or(usize::MAX);
    let Some(&line_start) = line_starts.get(line) else {
        return sql.len();
    };
    sql[line_start..]
        .char_indices()
        .nth(column)
        .map_or(sql.len(), |(i, _)| line_start + i)
}
