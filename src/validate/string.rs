use log::debug;
use serde::Serialize;

use crate::{
    db::Session,
    error::Result,
    sql::{QualifiedName, quote_ident, quote_literal},
    types::ColumnSpec,
};

use super::{ColumnValidator, IssueCategory, ValidationContext, ValidationIssue, count_with_examples};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringStats {
    pub column: String,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub avg_length: Option<f64>,
    pub null_count: i64,
    pub empty_count: i64,
}

/// Text columns are stored unbounded, so there is no length check; pattern
/// and not-empty rules are opt-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringValidator;

impl StringValidator {
    /// Always empty: target text columns have no maximum length.
    pub fn validate_lengths(&self, _columns: &[&ColumnSpec]) -> Vec<ValidationIssue> {
        Vec::new()
    }

    /// Counts non-empty values that do not fully match `pattern`.
    pub fn validate_pattern(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &ColumnSpec,
        pattern: &str,
        total_rows: u64,
    ) -> Result<Option<ValidationIssue>> {
        let col = quote_ident(&column.name);
        let predicate = format!(
            "NULLIF(TRIM({col}), '') IS NOT NULL AND NOT regexp_full_match(TRIM({col}), {})",
            quote_literal(pattern)
        );
        let (count, examples) = count_with_examples(session, staging, &column.name, &predicate)?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(
            ValidationIssue::data(IssueCategory::String, &column.name, count, total_rows, examples)
                .with_message(format!("did not match pattern {pattern}")),
        ))
    }

    pub fn validate_not_empty(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &ColumnSpec,
        total_rows: u64,
    ) -> Result<Option<ValidationIssue>> {
        let predicate = format!("NULLIF(TRIM({}), '') IS NULL", quote_ident(&column.name));
        let (count, _) = count_with_examples(session, staging, &column.name, &predicate)?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(
            ValidationIssue::data(IssueCategory::String, &column.name, count, total_rows, vec![])
                .with_message("empty or missing"),
        ))
    }

    pub fn statistics(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &str,
    ) -> Result<StringStats> {
        let col = quote_ident(column);
        let mut rows = session.query_rows(
            &format!(
                "SELECT CAST(MIN(length({col})) AS BIGINT), \
                        CAST(MAX(length({col})) AS BIGINT), \
                        AVG(length({col})), \
                        COUNT(CASE WHEN {col} IS NULL THEN 1 END), \
                        COUNT(CASE WHEN {col} IS NOT NULL AND TRIM({col}) = '' THEN 1 END) \
                 FROM {}",
                staging.quoted()
            ),
            &[],
            |row| {
                Ok(StringStats {
                    column: column.to_string(),
                    min_length: row.get(0)?,
                    max_length: row.get(1)?,
                    avg_length: row.get(2)?,
                    null_count: row.get(3)?,
                    empty_count: row.get(4)?,
                })
            },
        )?;
        Ok(rows.pop().unwrap_or(StringStats {
            column: column.to_string(),
            min_length: None,
            max_length: None,
            avg_length: None,
            null_count: 0,
            empty_count: 0,
        }))
    }
}

impl ColumnValidator for StringValidator {
    fn category(&self) -> IssueCategory {
        IssueCategory::String
    }

    fn validate(
        &self,
        session: &Session,
        ctx: &ValidationContext<'_>,
        columns: &[&ColumnSpec],
    ) -> Result<Vec<ValidationIssue>> {
        let mut issues = self.validate_lengths(columns);
        for column in columns {
            let stats = self.statistics(session, ctx.staging, &column.name)?;
            debug!("String statistics: {stats:?}");
            if let Some(pattern) = ctx.rules.patterns.get(&column.name)
                && let Some(issue) =
                    self.validate_pattern(session, ctx.staging, column, pattern, ctx.total_rows)?
            {
                issues.push(issue);
            }
            if ctx.rules.not_empty.contains(&column.name)
                && let Some(issue) =
                    self.validate_not_empty(session, ctx.staging, column, ctx.total_rows)?
            {
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}
