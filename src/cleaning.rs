//! SQL fragments that normalise staged text before conversion.
//!
//! All builders take an already rendered SQL expression (usually a quoted
//! column) and return a new expression. They never touch the database.

use crate::{dates::DateFormatPolicy, sql::quote_literal, types::TypeKind};

/// Cleaning variant applied to a staged column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleaningKind {
    Basic,
    Numeric,
    Date,
}

pub fn clean(kind: CleaningKind, expr: &str) -> String {
    match kind {
        CleaningKind::Basic => basic(expr),
        CleaningKind::Numeric => numeric(expr),
        CleaningKind::Date => date(expr),
    }
}

pub fn basic(expr: &str) -> String {
    format!("TRIM({expr})")
}

/// Strips quotes, thousands separators and spaces; a lone `-` or an empty
/// result becomes NULL.
pub fn numeric(expr: &str) -> String {
    let stripped = format!("REPLACE(REPLACE(REPLACE({expr}, '\"', ''), ',', ''), ' ', '')");
    format!("NULLIF(NULLIF(TRIM({stripped}), '-'), '')")
}

/// Removes tabs, line breaks and zero-width characters, folds non-breaking
/// spaces to plain spaces; a lone `-` or an empty result becomes NULL.
pub fn date(expr: &str) -> String {
    let mut inner = expr.to_string();
    for code in [9, 10, 13] {
        inner = format!("REPLACE({inner}, chr({code}), '')");
    }
    inner = format!("REPLACE({inner}, chr(160), ' ')");
    for code in [65279, 8203, 8288] {
        inner = format!("REPLACE({inner}, chr({code}), '')");
    }
    format!("NULLIF(NULLIF(TRIM({inner}), '-'), '')")
}

/// Tries every candidate format of `policy` in order; NULL when none parse.
pub fn timestamp_conversion(cleaned: &str, policy: DateFormatPolicy) -> String {
    let attempts = policy
        .candidates()
        .into_iter()
        .map(|format| format!("try_strptime({cleaned}, {})", quote_literal(format)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("COALESCE({attempts})")
}

pub fn try_cast(expr: &str, sql_type: &str) -> String {
    format!("TRY_CAST({expr} AS {sql_type})")
}

/// Optional sign followed by digits only.
pub const INTEGRAL_PATTERN: &str = "[+-]?[0-9]+";

/// Tolerant conversion of cleaned numeric text to `kind`. Integral kinds
/// only convert whole-number text; `1.5` becomes NULL instead of `2`.
pub fn numeric_conversion(cleaned: &str, kind: &TypeKind) -> String {
    let cast = try_cast(cleaned, &kind.sql_type());
    if kind.is_integral() {
        format!(
            "CASE WHEN regexp_full_match({cleaned}, {}) THEN {cast} END",
            quote_literal(INTEGRAL_PATTERN)
        )
    } else {
        cast
    }
}

/// In-process twin of the [`INTEGRAL_PATTERN`] check.
pub fn is_integral_text(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Same cleaning as [`numeric`], applied to a value in process. Used by the
/// diagnostics scan so it agrees with the SQL side.
pub fn clean_numeric_value(raw: &str) -> Option<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | ',' | ' '))
        .collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() || trimmed == "-" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// In-process counterpart of [`date`].
pub fn clean_date_value(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r' | '\u{feff}' | '\u{200b}' | '\u{2060}'))
        .map(|c| if c == '\u{a0}' { ' ' } else { c })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "-" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn numeric_expression_nulls_out_dashes() {
        let expr = numeric("\"amount\"");
        assert!(expr.starts_with("NULLIF(NULLIF(TRIM("));
        assert!(expr.contains("'-'"));
        assert!(expr.contains("REPLACE(\"amount\", '\"', '')"));
    }

    #[test]
    fn integral_conversion_guards_the_cast() {
        let integer = numeric_conversion("v", &TypeKind::Integer);
        assert_eq!(
            integer,
            "CASE WHEN regexp_full_match(v, '[+-]?[0-9]+') THEN TRY_CAST(v AS INTEGER) END"
        );
        assert_eq!(numeric_conversion("v", &TypeKind::Float), "TRY_CAST(v AS DOUBLE)");
        assert!(is_integral_text("-42"));
        assert!(is_integral_text("+7"));
        assert!(!is_integral_text("1.5"));
        assert!(!is_integral_text("1e3"));
        assert!(!is_integral_text("-"));
    }

    #[test]
    fn date_expression_strips_control_characters() {
        let expr = date("\"created\"");
        for code in ["chr(9)", "chr(10)", "chr(13)", "chr(160)", "chr(65279)"] {
            assert!(expr.contains(code), "missing {code} in {expr}");
        }
    }

    #[test]
    fn timestamp_conversion_orders_candidates_by_policy() {
        let uk = timestamp_conversion("x", DateFormatPolicy::UK);
        let us = timestamp_conversion("x", DateFormatPolicy::US);
        let uk_day = uk.find("'%d/%m/%Y'").expect("day-first candidate");
        let uk_month = uk.find("'%m/%d/%Y'").expect("month-first candidate");
        assert!(uk_day < uk_month);
        let us_day = us.find("'%d/%m/%Y'").expect("day-first candidate");
        let us_month = us.find("'%m/%d/%Y'").expect("month-first candidate");
        assert!(us_month < us_day);
    }

    #[test]
    fn in_process_cleaning_matches_sql_rules() {
        assert_eq!(clean_numeric_value(" \"1,234.50\" "), Some("1234.50".to_string()));
        assert_eq!(clean_numeric_value(" - "), None);
        assert_eq!(clean_numeric_value(""), None);
        assert_eq!(
            clean_date_value("\u{feff}01/02/2024\r\n"),
            Some("01/02/2024".to_string())
        );
        assert_eq!(clean_date_value("\t-\t"), None);
    }

    proptest! {
        #[test]
        fn cleaned_numbers_never_contain_separators(raw in "[0-9, \"-]{0,12}") {
            if let Some(cleaned) = clean_numeric_value(&raw) {
                prop_assert!(!cleaned.contains(','));
                prop_assert!(!cleaned.contains(' '));
                prop_assert!(!cleaned.contains('"'));
                prop_assert!(!cleaned.is_empty());
            }
        }
    }
}
