use serde::{Deserialize, Serialize};

use crate::{
    db::Session,
    error::{LoadError, Result},
    sql::{QualifiedName, quote_ident, quote_literal},
    types::ColumnSpec,
};

use super::{ColumnValidator, IssueCategory, ValidationContext, ValidationIssue, count_with_examples};

const DEFAULT_TRUE: &[&str] = &["1", "TRUE", "Y", "YES"];
const DEFAULT_FALSE: &[&str] = &["0", "FALSE", "N", "NO"];

/// Accepted true/false spellings, compared trimmed and case-insensitively.
/// An empty value is always accepted and converts to NULL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanVocabulary {
    pub true_values: Vec<String>,
    pub false_values: Vec<String>,
}

impl Default for BooleanVocabulary {
    fn default() -> Self {
        Self {
            true_values: DEFAULT_TRUE.iter().map(|v| v.to_string()).collect(),
            false_values: DEFAULT_FALSE.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl BooleanVocabulary {
    pub fn new(true_values: Vec<String>, false_values: Vec<String>) -> Result<Self> {
        let vocabulary = Self {
            true_values,
            false_values,
        };
        vocabulary.ensure_valid()?;
        Ok(vocabulary)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        if self.true_values.is_empty() || self.false_values.is_empty() {
            return Err(LoadError::config(
                "Boolean vocabulary needs at least one true and one false value",
            ));
        }
        if let Some(overlap) = self
            .normalized_true()
            .into_iter()
            .find(|value| self.normalized_false().contains(value))
        {
            return Err(LoadError::config(format!(
                "Boolean value '{overlap}' is listed as both true and false"
            )));
        }
        Ok(())
    }

    fn normalized_true(&self) -> Vec<String> {
        normalize(&self.true_values)
    }

    fn normalized_false(&self) -> Vec<String> {
        normalize(&self.false_values)
    }

    pub fn parse(&self, raw: &str) -> Option<bool> {
        let value = raw.trim().to_uppercase();
        if self.normalized_true().contains(&value) {
            Some(true)
        } else if self.normalized_false().contains(&value) {
            Some(false)
        } else {
            None
        }
    }

    pub fn accepts(&self, raw: &str) -> bool {
        raw.trim().is_empty() || self.parse(raw).is_some()
    }

    /// Upper-cased, trimmed form of `expr` used for comparisons.
    pub fn normalized_expression(expr: &str) -> String {
        format!("UPPER(TRIM(COALESCE({expr}, '')))")
    }

    /// CASE expression mapping the vocabulary to TRUE/FALSE, anything else
    /// to NULL.
    pub fn case_expression(&self, expr: &str) -> String {
        let normalized = Self::normalized_expression(expr);
        format!(
            "CASE WHEN {normalized} IN ({}) THEN TRUE WHEN {normalized} IN ({}) THEN FALSE ELSE NULL END",
            literal_list(&self.normalized_true()),
            literal_list(&self.normalized_false()),
        )
    }

    /// Predicate that holds for values outside the vocabulary.
    pub fn invalid_predicate(&self, expr: &str) -> String {
        let mut accepted = self.normalized_true();
        accepted.extend(self.normalized_false());
        accepted.push(String::new());
        format!(
            "{} NOT IN ({})",
            Self::normalized_expression(expr),
            literal_list(&accepted)
        )
    }
}

fn normalize(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.trim().to_uppercase()).collect()
}

fn literal_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| quote_literal(value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanValidator;

impl BooleanValidator {
    pub fn validate_column(
        &self,
        session: &Session,
        staging: &QualifiedName,
        column: &ColumnSpec,
        vocabulary: &BooleanVocabulary,
        total_rows: u64,
    ) -> Result<Option<ValidationIssue>> {
        let predicate = vocabulary.invalid_predicate(&quote_ident(&column.name));
        let (count, examples) = count_with_examples(session, staging, &column.name, &predicate)?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(ValidationIssue::data(
            IssueCategory::Boolean,
            &column.name,
            count,
            total_rows,
            examples,
        )))
    }
}

impl ColumnValidator for BooleanValidator {
    fn category(&self) -> IssueCategory {
        IssueCategory::Boolean
    }

    fn validate(
        &self,
        session: &Session,
        ctx: &ValidationContext<'_>,
        columns: &[&ColumnSpec],
    ) -> Result<Vec<ValidationIssue>> {
        let default_vocabulary = BooleanVocabulary::default();
        let vocabulary = ctx.vocabulary.unwrap_or(&default_vocabulary);
        let mut issues = Vec::new();
        for column in columns {
            if let Some(issue) =
                self.validate_column(session, ctx.staging, column, vocabulary, ctx.total_rows)?
            {
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}
