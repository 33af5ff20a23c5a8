use crate::{
    cleaning,
    db::Session,
    error::Result,
    sql::{QualifiedName, quote_ident},
    types::ColumnSpec,
};

use super::{
    ColumnValidator, IssueCategory, NumericRange, ValidationContext, ValidationIssue,
    count_with_examples,
};

/// Flags values that survive cleaning but do not convert to the column's
/// numeric type.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericValidator;

impl NumericValidator {
    pub fn validate_column(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &ColumnSpec,
        total_rows: u64,
    ) -> Result<Option<ValidationIssue>> {
        let cleaned = cleaning::numeric(&quote_ident(&column.name));
        let failed = format!(
            "{cleaned} IS NOT NULL AND {} IS NULL",
            cleaning::numeric_conversion(&cleaned, &column.kind)
        );
        let (count, examples) = count_with_examples(session, staging, &column.name, &failed)?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(ValidationIssue::data(
            IssueCategory::Numeric,
            &column.name,
            count,
            total_rows,
            examples,
        )))
    }

    /// Counts convertible values outside `[min, max]`.
    pub fn validate_range(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &ColumnSpec,
        range: &NumericRange,
        total_rows: u64,
    ) -> Result<Option<ValidationIssue>> {
        let value = cleaning::try_cast(&cleaning::numeric(&quote_ident(&column.name)), "DOUBLE");
        let mut bounds = Vec::new();
        if let Some(min) = range.min {
            bounds.push(format!("{value} < {min:?}"));
        }
        if let Some(max) = range.max {
            bounds.push(format!("{value} > {max:?}"));
        }
        if bounds.is_empty() {
            return Ok(None);
        }
        let outside = format!("({})", bounds.join(" OR "));
        let (count, examples) = count_with_examples(session, staging, &column.name, &outside)?;
        if count == 0 {
            return Ok(None);
        }
        let describe = |bound: Option<f64>| bound.map_or("-".to_string(), |b| b.to_string());
        Ok(Some(
            ValidationIssue::data(IssueCategory::Numeric, &column.name, count, total_rows, examples)
                .with_message(format!(
                    "outside range [{}, {}]",
                    describe(range.min),
                    describe(range.max)
                )),
        ))
    }
}

impl ColumnValidator for NumericValidator {
    fn category(&self) -> IssueCategory {
        IssueCategory::Numeric
    }

    fn validate(
        &self,
        session: &Session,
        ctx: &ValidationContext<'_>,
        columns: &[&ColumnSpec],
    ) -> Result<Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        for column in columns {
            if let Some(issue) = self.validate_column(session, ctx.staging, column, ctx.total_rows)? {
                issues.push(issue);
            }
            if let Some(range) = ctx.rules.numeric_ranges.get(&column.name)
                && let Some(issue) =
                    self.validate_range(session, ctx.staging, column, range, ctx.total_rows)?
            {
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}
