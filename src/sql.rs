//! Identifier validation, quoting and qualified table names.
//!
//! Every identifier that reaches generated SQL goes through this module.
//! Schema and table names are validated against a conservative pattern;
//! column names are free-form (spreadsheet headers) and always quoted.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, Result};

pub const MAX_IDENTIFIER_LENGTH: usize = 128;

const RESERVED_NAMES: &[&str] = &[
    "drop", "delete", "truncate", "exec", "execute", "alter", "create", "insert", "update",
    "grant", "revoke",
];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Validates a schema or table name and returns it trimmed.
pub fn validate_identifier(identifier: &str) -> Result<String> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid_identifier(identifier, "must not be empty"));
    }
    if trimmed.len() > MAX_IDENTIFIER_LENGTH {
        return Err(LoadError::invalid_identifier(
            identifier,
            format!("longer than {MAX_IDENTIFIER_LENGTH} characters"),
        ));
    }
    if !identifier_pattern().is_match(trimmed) {
        return Err(LoadError::invalid_identifier(
            identifier,
            "must start with a letter or underscore and contain only letters, digits and underscores",
        ));
    }
    if RESERVED_NAMES.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return Err(LoadError::invalid_identifier(identifier, "reserved SQL keyword"));
    }
    Ok(trimmed.to_string())
}

/// Validates a column name. Column names are quoted, so only emptiness and
/// length are restricted.
pub fn validate_column_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LoadError::invalid_identifier(name, "column name must not be empty"));
    }
    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(LoadError::invalid_identifier(
            name,
            format!("longer than {MAX_IDENTIFIER_LENGTH} characters"),
        ));
    }
    Ok(())
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// A `schema.table` pair whose parts have passed [`validate_identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: String,
    pub table: String,
}

impl QualifiedName {
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        Ok(Self {
            schema: validate_identifier(schema)?,
            table: validate_identifier(table)?,
        })
    }

    /// Parses `schema.table`, falling back to `default_schema` when no schema
    /// part is present.
    pub fn parse(value: &str, default_schema: &str) -> Result<Self> {
        match value.split_once('.') {
            Some((schema, table)) => Self::new(schema, table),
            None => Self::new(default_schema, value),
        }
    }

    /// The staging table that feeds this table.
    pub fn staging(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            table: format!("{}__stg", self.table),
        }
    }

    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Name for an index on this table. DuckDB scopes index names per schema,
    /// so the table name is embedded to keep them distinct.
    pub fn index_name(&self, suffix: &str) -> String {
        format!("ix_{}_{}", self.table, suffix)
    }

    pub fn quoted_index(&self, index_name: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(index_name))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_identifier_accepts_simple_names() {
        assert_eq!(validate_identifier(" sales_2024 ").unwrap(), "sales_2024");
        assert_eq!(validate_identifier("_tmp").unwrap(), "_tmp");
    }

    #[test]
    fn validate_identifier_rejects_injection_and_keywords() {
        assert!(validate_identifier("sales; DROP TABLE x").is_err());
        assert!(validate_identifier("1sales").is_err());
        assert!(validate_identifier("Delete").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("Order \"ID\""), "\"Order \"\"ID\"\"\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn qualified_name_parses_and_derives_staging() {
        let name = QualifiedName::parse("bronze.sales", "main").unwrap();
        assert_eq!(name.to_string(), "bronze.sales");
        assert_eq!(name.staging().to_string(), "bronze.sales__stg");
        assert_eq!(name.quoted(), "\"bronze\".\"sales\"");

        let defaulted = QualifiedName::parse("sales", "bronze").unwrap();
        assert_eq!(defaulted.schema, "bronze");
        assert_eq!(defaulted.index_name("loaded_at"), "ix_sales_loaded_at");
    }
}
