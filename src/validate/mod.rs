//! Staged-data validation: issue model, severity rules and per-category
//! validators.
//!
//! Validators never fail on data-quality findings. They return
//! [`ValidationIssue`] values computed with one aggregate query per column;
//! only database or cancellation errors come back as `Err`.

pub mod boolean;
pub mod date;
pub mod indexes;
pub mod numeric;
pub mod orchestrator;
pub mod schema;
pub mod string;

use std::{collections::BTreeMap, fmt};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    dates::DateFormatPolicy,
    db::Session,
    error::{LoadError, Result},
    sql::{QualifiedName, quote_ident},
    types::{ColumnSpec, RequiredColumns, TypeCategory},
};

pub use boolean::BooleanVocabulary;
pub use orchestrator::{Phase, ValidationOptions, ValidationOrchestrator};

/// Percentage above which an issue blocks the load.
pub const ERROR_THRESHOLD: f64 = 50.0;
/// Percentage above which an issue is surfaced as a warning.
pub const WARNING_THRESHOLD: f64 = 10.0;

pub(crate) const MAX_EXAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Numeric,
    Date,
    Boolean,
    String,
    Schema,
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueCategory::Numeric => "numeric",
            IssueCategory::Date => "date",
            IssueCategory::Boolean => "boolean",
            IssueCategory::String => "string",
            IssueCategory::Schema => "schema",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(label)
    }
}

/// `error_count / total_rows * 100`, rounded to two decimals.
pub fn percentage(error_count: u64, total_rows: u64) -> f64 {
    if total_rows == 0 {
        return 0.0;
    }
    let raw = error_count as f64 / total_rows as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Strictly above 50% blocks; strictly above 10% warns; anything else is
/// informational.
pub fn classify(percentage: f64) -> Severity {
    if percentage > ERROR_THRESHOLD {
        Severity::Error
    } else if percentage > WARNING_THRESHOLD {
        Severity::Warning
    } else {
        Severity::Info
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub category: IssueCategory,
    pub column: String,
    pub error_count: u64,
    pub total_rows: u64,
    pub percentage: f64,
    pub examples: Vec<String>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationIssue {
    /// Data-quality issue whose severity follows from its percentage.
    pub fn data(
        category: IssueCategory,
        column: &str,
        error_count: u64,
        total_rows: u64,
        examples: Vec<String>,
    ) -> Self {
        let percentage = percentage(error_count, total_rows);
        Self {
            category,
            column: column.to_string(),
            error_count,
            total_rows,
            percentage,
            examples,
            severity: classify(percentage),
            message: None,
        }
    }

    /// Schema-level note with a fixed severity.
    pub fn schema(column: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category: IssueCategory::Schema,
            column: column.to_string(),
            error_count: 0,
            total_rows: 0,
            percentage: 0.0,
            examples: Vec::new(),
            severity,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn describe(&self) -> String {
        match &self.message {
            Some(message) if self.error_count == 0 => format!("{}: {message}", self.column),
            Some(message) => format!(
                "{}: {} of {} row(s) ({:.2}%) {message}",
                self.column, self.error_count, self.total_rows, self.percentage
            ),
            None => format!(
                "{}: {} of {} row(s) ({:.2}%) failed {} validation",
                self.column, self.error_count, self.total_rows, self.percentage, self.category
            ),
        }
    }
}

/// A validation phase that failed to run. Recorded so a missing contribution
/// is visible in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub phase: String,
    /// Set when only one column's task failed inside a per-column phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub error: String,
}

impl PhaseFailure {
    pub fn label(&self) -> String {
        match &self.column {
            Some(column) => format!("{} ({column})", self.phase),
            None => self.phase.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub total_rows: u64,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
    pub phase_failures: Vec<PhaseFailure>,
    pub summary: String,
}

impl ValidationReport {
    pub fn from_issues(
        total_rows: u64,
        issues: Vec<ValidationIssue>,
        phase_failures: Vec<PhaseFailure>,
    ) -> Self {
        let mut blocking = Vec::new();
        let mut warnings = Vec::new();
        let mut info = Vec::new();
        for issue in issues {
            match issue.severity {
                Severity::Error => blocking.push(issue),
                Severity::Warning => warnings.push(issue),
                Severity::Info => info.push(issue),
            }
        }
        let is_valid = blocking.is_empty();
        let mut summary = if is_valid {
            format!(
                "Validation passed for {total_rows} row(s): {} warning(s), {} note(s)",
                warnings.len(),
                info.len()
            )
        } else {
            format!(
                "Validation failed for {total_rows} row(s): {} blocking issue(s), {} warning(s)",
                blocking.len(),
                warnings.len()
            )
        };
        if !phase_failures.is_empty() {
            let phases = phase_failures
                .iter()
                .map(PhaseFailure::label)
                .collect::<Vec<_>>()
                .join(", ");
            summary.push_str(&format!("; phase(s) not completed: {phases}"));
        }
        Self {
            is_valid,
            total_rows,
            issues: blocking,
            warnings,
            info,
            phase_failures,
            summary,
        }
    }

    pub fn all_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .chain(self.warnings.iter())
            .chain(self.info.iter())
    }

    /// Non-blocking issues, warnings first.
    pub fn advisory(&self) -> Vec<ValidationIssue> {
        self.warnings.iter().chain(self.info.iter()).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub min: Option<NaiveDate>,
    #[serde(default)]
    pub max: Option<NaiveDate>,
}

/// Opt-in checks layered on top of the per-type validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRules {
    #[serde(default)]
    pub numeric_ranges: BTreeMap<String, NumericRange>,
    #[serde(default)]
    pub date_ranges: BTreeMap<String, DateRange>,
    #[serde(default)]
    pub patterns: BTreeMap<String, String>,
    #[serde(default)]
    pub not_empty: Vec<String>,
}

impl ValidationRules {
    pub fn is_empty(&self) -> bool {
        self.numeric_ranges.is_empty()
            && self.date_ranges.is_empty()
            && self.patterns.is_empty()
            && self.not_empty.is_empty()
    }

    /// Checks that every rule names a known column of the category the rule
    /// applies to and that every pattern compiles.
    pub fn ensure_valid(&self, columns: &RequiredColumns) -> Result<()> {
        let targets = self
            .numeric_ranges
            .keys()
            .map(|name| (name, TypeCategory::Numeric))
            .chain(self.date_ranges.keys().map(|name| (name, TypeCategory::DateTime)))
            .chain(self.patterns.keys().map(|name| (name, TypeCategory::String)))
            .chain(self.not_empty.iter().map(|name| (name, TypeCategory::String)));
        for (name, category) in targets {
            let Some(column) = columns.get(name) else {
                return Err(LoadError::config(format!(
                    "Validation rule references unknown column '{name}'"
                )));
            };
            if column.category() != category {
                return Err(LoadError::config(format!(
                    "Validation rule for '{name}' needs a {category} column, found {}",
                    column.kind
                )));
            }
        }
        for (column, pattern) in &self.patterns {
            regex::Regex::new(pattern).map_err(|err| {
                LoadError::config(format!("Invalid pattern for column '{column}': {err}"))
            })?;
        }
        Ok(())
    }
}

/// Everything a validator needs to know about the batch under test.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub staging: &'a QualifiedName,
    pub final_table: &'a QualifiedName,
    pub required: &'a RequiredColumns,
    pub date_policy: DateFormatPolicy,
    pub vocabulary: Option<&'a BooleanVocabulary>,
    pub rules: &'a ValidationRules,
    pub upsert_keys: &'a [String],
    pub total_rows: u64,
}

/// One validator per issue category.
pub trait ColumnValidator: Send + Sync {
    fn category(&self) -> IssueCategory;

    fn validate(
        &self,
        session: &Session,
        ctx: &ValidationContext<'_>,
        columns: &[&ColumnSpec],
    ) -> Result<Vec<ValidationIssue>>;
}

/// Runs one aggregate count for `predicate` plus a small sample of the raw
/// offending values.
pub(crate) fn count_with_examples(
    session: &Session,
    staging: &QualifiedName,
    column: &str,
    predicate: &str,
) -> Result<(u64, Vec<String>)> {
    let count = session.query_count(
        &format!(
            "SELECT COUNT(CASE WHEN {predicate} THEN 1 END) FROM {}",
            staging.quoted()
        ),
        &[],
    )?;
    if count <= 0 {
        return Ok((0, Vec::new()));
    }
    let examples = session
        .query_column(
            &format!(
                "SELECT DISTINCT CAST({col} AS VARCHAR) FROM {table} WHERE {predicate} \
                 ORDER BY 1 LIMIT {MAX_EXAMPLES}",
                col = quote_ident(column),
                table = staging.quoted(),
            ),
            &[],
        )?
        .into_iter()
        .map(|value| value.unwrap_or_default())
        .collect();
    Ok((non_negative(count), examples))
}

pub(crate) fn non_negative(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn severity_boundaries_are_strict() {
        assert_eq!(classify(percentage(51, 100)), Severity::Error);
        assert_eq!(classify(percentage(50, 100)), Severity::Warning);
        assert_eq!(classify(percentage(11, 100)), Severity::Warning);
        assert_eq!(classify(percentage(10, 100)), Severity::Info);
        assert_eq!(classify(percentage(9, 100)), Severity::Info);
    }

    #[test]
    fn one_bad_row_of_two_is_not_blocking() {
        // 1 of 2 sits exactly on the 50% boundary and stays advisory.
        let issue = ValidationIssue::data(IssueCategory::Numeric, "id", 1, 2, vec![]);
        assert_eq!(issue.percentage, 50.0);
        assert!(!issue.is_blocking());
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn report_partitions_issues_by_severity() {
        let report = ValidationReport::from_issues(
            100,
            vec![
                ValidationIssue::data(IssueCategory::Numeric, "a", 60, 100, vec![]),
                ValidationIssue::data(IssueCategory::Date, "b", 20, 100, vec![]),
                ValidationIssue::schema("c", Severity::Info, "bounded text column"),
            ],
            vec![PhaseFailure {
                phase: "Boolean".into(),
                column: None,
                error: "boom".into(),
            }],
        );
        assert!(!report.is_valid);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.info.len(), 1);
        assert_eq!(report.all_issues().count(), 3);
        assert!(report.summary.contains("phase(s) not completed: Boolean"));
    }

    #[test]
    fn rules_must_reference_known_columns_and_compile() {
        use crate::types::{ColumnSpec, TypeKind};
        let columns = RequiredColumns::new(vec![ColumnSpec::new("code", TypeKind::Text)]).unwrap();
        let mut rules = ValidationRules::default();
        rules.patterns.insert("code".into(), "^[A-Z]{3}$".into());
        assert!(rules.ensure_valid(&columns).is_ok());
        rules.patterns.insert("code".into(), "([".into());
        assert!(rules.ensure_valid(&columns).is_err());
        let mut unknown = ValidationRules::default();
        unknown.not_empty.push("missing".into());
        assert!(unknown.ensure_valid(&columns).is_err());
        let mut mismatched = ValidationRules::default();
        mismatched.numeric_ranges.insert("code".into(), NumericRange::default());
        let err = mismatched.ensure_valid(&columns).unwrap_err();
        assert!(err.to_string().contains("needs a numeric column"));
    }

    proptest! {
        #[test]
        fn classification_is_monotonic(errors in 0u64..=1000, total in 1u64..=1000) {
            let errors = errors.min(total);
            let p = percentage(errors, total);
            let severity = classify(p);
            prop_assert_eq!(severity == Severity::Error, p > ERROR_THRESHOLD);
            if errors < total {
                let worse = classify(percentage(errors + 1, total));
                prop_assert!(worse <= severity);
            }
        }
    }
}
