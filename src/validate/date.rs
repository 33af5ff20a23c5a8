use crate::{
    cleaning,
    dates::DateFormatPolicy,
    db::Session,
    error::Result,
    sql::{QualifiedName, quote_ident, quote_literal},
    types::ColumnSpec,
};

use super::{
    ColumnValidator, DateRange, IssueCategory, ValidationContext, ValidationIssue,
    count_with_examples,
};

const MAX_DEBUG_SAMPLES: usize = 5;

/// Flags values that no candidate format of the active policy can parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateValidator;

impl DateValidator {
    pub fn validate_column(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &ColumnSpec,
        policy: DateFormatPolicy,
        total_rows: u64,
    ) -> Result<Option<ValidationIssue>> {
        let cleaned = cleaning::date(&quote_ident(&column.name));
        let converted = cleaning::timestamp_conversion(&cleaned, policy);
        let failed = format!("{cleaned} IS NOT NULL AND {converted} IS NULL");
        let count = session.query_count(
            &format!(
                "SELECT COUNT(CASE WHEN {failed} THEN 1 END) FROM {}",
                staging.quoted()
            ),
            &[],
        )?;
        if count <= 0 {
            return Ok(None);
        }
        let samples = self.debug_samples(session, staging, &column.name, &cleaned, &failed)?;
        Ok(Some(
            ValidationIssue::data(
                IssueCategory::Date,
                &column.name,
                super::non_negative(count),
                total_rows,
                samples,
            )
            .with_message(format!("could not be parsed with the {policy} date format")),
        ))
    }

    /// Up to five `raw -> cleaned` pairs for failing rows.
    fn debug_samples(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &str,
        cleaned: &str,
        failed: &str,
    ) -> Result<Vec<String>> {
        session.query_rows(
            &format!(
                "SELECT DISTINCT {col}, {cleaned} FROM {table} WHERE {failed} \
                 ORDER BY 1 LIMIT {MAX_DEBUG_SAMPLES}",
                col = quote_ident(column),
                table = staging.quoted(),
            ),
            &[],
            |row| {
                let raw: Option<String> = row.get(0)?;
                let cleaned: Option<String> = row.get(1)?;
                Ok(format!(
                    "{:?} -> {:?}",
                    raw.unwrap_or_default(),
                    cleaned.unwrap_or_default()
                ))
            },
        )
    }

    /// Counts parseable dates outside `[min, max]`.
    pub fn validate_range(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &ColumnSpec,
        policy: DateFormatPolicy,
        range: &DateRange,
        total_rows: u64,
    ) -> Result<Option<ValidationIssue>> {
        let converted = format!(
            "CAST({} AS DATE)",
            cleaning::timestamp_conversion(&cleaning::date(&quote_ident(&column.name)), policy)
        );
        let mut bounds = Vec::new();
        if let Some(min) = range.min {
            bounds.push(format!(
                "{converted} < CAST({} AS DATE)",
                quote_literal(&min.to_string())
            ));
        }
        if let Some(max) = range.max {
            bounds.push(format!(
                "{converted} > CAST({} AS DATE)",
                quote_literal(&max.to_string())
            ));
        }
        if bounds.is_empty() {
            return Ok(None);
        }
        let outside = format!("({})", bounds.join(" OR "));
        let (count, examples) = count_with_examples(session, staging, &column.name, &outside)?;
        if count == 0 {
            return Ok(None);
        }
        let describe = |bound: Option<chrono::NaiveDate>| {
            bound.map_or("-".to_string(), |date| date.to_string())
        };
        Ok(Some(
            ValidationIssue::data(IssueCategory::Date, &column.name, count, total_rows, examples)
                .with_message(format!(
                    "outside range [{}, {}]",
                    describe(range.min),
                    describe(range.max)
                )),
        ))
    }
}

impl ColumnValidator for DateValidator {
    fn category(&self) -> IssueCategory {
        IssueCategory::Date
    }

    fn validate(
        &self,
        session: &Session,
        ctx: &ValidationContext<'_>,
        columns: &[&ColumnSpec],
    ) -> Result<Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        for column in columns {
            if let Some(issue) =
                self.validate_column(session, ctx.staging, column, ctx.date_policy, ctx.total_rows)?
            {
                issues.push(issue);
            }
            if let Some(range) = ctx.rules.date_ranges.get(&column.name)
                && let Some(issue) = self.validate_range(
                    session,
                    ctx.staging,
                    column,
                    ctx.date_policy,
                    range,
                    ctx.total_rows,
                )?
            {
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}
