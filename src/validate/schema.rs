use itertools::Itertools;

use crate::{
    db::Session,
    error::Result,
    introspect::{LiveColumn, SchemaIntrospector},
    sql::{QualifiedName, quote_ident},
    types::{ColumnSpec, RequiredColumns},
};

use super::{
    ColumnValidator, IssueCategory, MAX_EXAMPLES, Severity, ValidationContext, ValidationIssue,
    non_negative,
};

/// Compares the live final table against the configured columns and checks
/// key uniqueness in staging.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    /// Issues for the final table; none when the table does not exist yet.
    pub fn compare(&self, live: &[LiveColumn], required: &RequiredColumns) -> Vec<ValidationIssue> {
        if live.is_empty() {
            return Vec::new();
        }
        let mut issues = Vec::new();
        for column in required {
            let Some(existing) = live.iter().find(|c| c.name == column.name) else {
                issues.push(ValidationIssue::schema(
                    &column.name,
                    Severity::Warning,
                    "not present in the final table; the table will be recreated",
                ));
                continue;
            };
            if column.kind.is_text() && existing.is_bounded_text() {
                issues.push(ValidationIssue::schema(
                    &column.name,
                    Severity::Info,
                    format!(
                        "configured as unbounded text but the final column is {}({}); long values may be truncated",
                        existing.data_type,
                        existing.max_length.unwrap_or_default()
                    ),
                ));
            }
            if column.nullable != existing.nullable {
                let (configured, actual) = if column.nullable {
                    ("nullable", "NOT NULL")
                } else {
                    ("NOT NULL", "nullable")
                };
                issues.push(ValidationIssue::schema(
                    &column.name,
                    Severity::Warning,
                    format!("configured as {configured} but the final column is {actual}"),
                ));
            }
        }
        issues
    }

    /// Counts staging rows whose trimmed key values occur more than once.
    pub fn check_unique(
        &self,
        session: &Session,
        staging: &QualifiedName,
        keys: &[String],
        total_rows: u64,
    ) -> Result<Option<ValidationIssue>> {
        if keys.is_empty() {
            return Ok(None);
        }
        let key_list = keys
            .iter()
            .map(|key| format!("TRIM({})", quote_ident(key)))
            .join(", ");
        let groups = format!(
            "SELECT concat_ws(' | ', {key_list}) AS key_value, COUNT(*) AS n \
             FROM {} GROUP BY {key_list} HAVING COUNT(*) > 1",
            staging.quoted()
        );
        let duplicates = session.query_count(
            &format!("SELECT CAST(COALESCE(SUM(n), 0) AS BIGINT) FROM ({groups})"),
            &[],
        )?;
        if duplicates <= 0 {
            return Ok(None);
        }
        let examples = session
            .query_column(
                &format!("SELECT key_value FROM ({groups}) ORDER BY 1 LIMIT {MAX_EXAMPLES}"),
                &[],
            )?
            .into_iter()
            .map(|value| value.unwrap_or_default())
            .collect();
        let column = keys.join(", ");
        let mut issue = ValidationIssue::data(
            IssueCategory::Schema,
            &column,
            non_negative(duplicates),
            total_rows,
            examples,
        )
        .with_message("rows share an upsert key value");
        issue.severity = Severity::Warning;
        Ok(Some(issue))
    }
}

impl ColumnValidator for SchemaValidator {
    fn category(&self) -> IssueCategory {
        IssueCategory::Schema
    }

    fn validate(
        &self,
        session: &Session,
        ctx: &ValidationContext<'_>,
        _columns: &[&ColumnSpec],
    ) -> Result<Vec<ValidationIssue>> {
        let live = SchemaIntrospector::new(session).columns(ctx.final_table)?;
        let mut issues = self.compare(&live, ctx.required);
        if let Some(issue) = self.check_unique(session, ctx.staging, ctx.upsert_keys, ctx.total_rows)? {
            issues.push(issue);
        }
        Ok(issues)
    }
}
