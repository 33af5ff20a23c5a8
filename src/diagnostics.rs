//! Best-effort explanations for transfer failures that validation did not
//! predict. Everything here is heuristic and runs against the in-memory
//! dataset, never the database.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    cleaning::{clean_date_value, clean_numeric_value, is_integral_text},
    dataset::Dataset,
    dates::DateFormatPolicy,
    types::{ColumnSpec, RequiredColumns, TypeKind},
    validate::BooleanVocabulary,
};

pub const MAX_PROBLEM_COLUMNS: usize = 5;
pub const MAX_PROBLEM_EXAMPLES: usize = 3;

const NOISE_MARKERS: &[&str] = &["[SQL:", "[parameters:", "LINE "];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemColumn {
    pub column: String,
    pub problem: String,
    pub examples: Vec<String>,
}

/// First line of a driver error with statement and parameter dumps removed.
pub fn short_error_message(error: &str) -> String {
    let first_line = error.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let cut = NOISE_MARKERS
        .iter()
        .filter_map(|marker| first_line.find(marker))
        .min()
        .unwrap_or(first_line.len());
    let short = first_line[..cut].trim();
    if short.is_empty() {
        "Unknown database error".to_string()
    } else {
        short.to_string()
    }
}

/// Columns most likely responsible for a failed transfer, each with a few
/// offending values.
pub fn detect_problem_columns(
    dataset: &Dataset,
    columns: &RequiredColumns,
    policy: DateFormatPolicy,
    vocabulary: Option<&BooleanVocabulary>,
) -> Vec<ProblemColumn> {
    let default_vocabulary = BooleanVocabulary::default();
    let vocabulary = vocabulary.unwrap_or(&default_vocabulary);
    let mut problems = Vec::new();
    for column in columns {
        if problems.len() >= MAX_PROBLEM_COLUMNS {
            break;
        }
        let Some(values) = dataset.values(&column.name) else {
            continue;
        };
        let mut problem: Option<String> = None;
        let mut examples = Vec::new();
        for value in values {
            let Some(found) = check_value(column, value, policy, vocabulary) else {
                continue;
            };
            problem.get_or_insert(found);
            let sample = value.unwrap_or("<empty>").to_string();
            if !examples.contains(&sample) {
                examples.push(sample);
            }
            if examples.len() >= MAX_PROBLEM_EXAMPLES {
                break;
            }
        }
        if let Some(problem) = problem {
            problems.push(ProblemColumn {
                column: column.name.clone(),
                problem,
                examples,
            });
        }
    }
    problems
}

fn check_value(
    column: &ColumnSpec,
    raw: Option<&str>,
    policy: DateFormatPolicy,
    vocabulary: &BooleanVocabulary,
) -> Option<String> {
    let cleaned = match column.kind {
        TypeKind::Date | TypeKind::DateTime => raw.and_then(clean_date_value),
        TypeKind::Integer | TypeKind::SmallInteger | TypeKind::Float | TypeKind::Decimal(_) => {
            raw.and_then(clean_numeric_value)
        }
        _ => raw.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string),
    };
    let Some(value) = cleaned else {
        return (!column.nullable).then(|| "empty value in a NOT NULL column".to_string());
    };
    match &column.kind {
        TypeKind::Integer => integer_problem(&value, i64::from(i32::MIN), i64::from(i32::MAX)),
        TypeKind::SmallInteger => {
            integer_problem(&value, i64::from(i16::MIN), i64::from(i16::MAX))
        }
        TypeKind::Float => value
            .parse::<f64>()
            .is_err()
            .then(|| "not a number".to_string()),
        TypeKind::Decimal(spec) => match parse_decimal(&value) {
            None => Some("not a number".to_string()),
            Some(number) if integer_digits(&number) > spec.integer_digits() => Some(format!(
                "exceeds decimal({},{}) precision",
                spec.precision, spec.scale
            )),
            Some(_) => None,
        },
        TypeKind::Date | TypeKind::DateTime => policy
            .parse(&value)
            .is_none()
            .then(|| format!("not a date in the {policy} format")),
        TypeKind::Boolean => (!vocabulary.accepts(&value))
            .then(|| "not a recognised boolean value".to_string()),
        TypeKind::Text | TypeKind::Binary => None,
    }
}

fn integer_problem(value: &str, min: i64, max: i64) -> Option<String> {
    if !is_integral_text(value) {
        return Some("not a whole number".to_string());
    }
    let in_range = value.parse::<i64>().is_ok_and(|n| (min..=max).contains(&n));
    (!in_range).then(|| format!("outside the range {min}..={max}"))
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

fn integer_digits(number: &Decimal) -> u32 {
    let whole = number.trunc().abs();
    if whole.is_zero() {
        return 0;
    }
    let rendered = whole.to_string();
    rendered.split('.').next().map_or(0, str::len) as u32
}
