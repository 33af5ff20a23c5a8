//! Date format policies shared by validation, transfer and diagnostics.
//!
//! The same format strings drive the database side (`try_strptime`) and the
//! in-process side (`chrono`), so a value that validates also converts.

use std::{fmt, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, Result};

const DAY_FIRST: &[&str] = &[
    "%d/%m/%y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%y %H:%M",
    "%d/%m/%Y %H:%M",
    "%d/%m/%y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%d-%m-%Y",
];

const MONTH_FIRST: &[&str] = &[
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m.%d.%Y",
    "%m-%d-%Y",
];

const ISO: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%Y/%m/%d",
];

/// Which of two ambiguous day/month orders is tried first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateFormatPolicy {
    #[default]
    #[serde(alias = "uk", alias = "Uk")]
    UK,
    #[serde(alias = "us", alias = "Us")]
    US,
}

impl DateFormatPolicy {
    /// Format candidates in the order they are tried.
    pub fn candidates(&self) -> Vec<&'static str> {
        let (primary, fallback) = match self {
            DateFormatPolicy::UK => (DAY_FIRST, MONTH_FIRST),
            DateFormatPolicy::US => (MONTH_FIRST, DAY_FIRST),
        };
        primary
            .iter()
            .chain(ISO.iter())
            .chain(fallback.iter())
            .copied()
            .collect()
    }

    /// Parses a cleaned value with the first candidate that accepts it.
    pub fn parse(&self, value: &str) -> Option<NaiveDateTime> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.candidates()
            .into_iter()
            .find_map(|format| parse_with_format(trimmed, format))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DateFormatPolicy::UK => "UK",
            DateFormatPolicy::US => "US",
        }
    }
}

fn parse_with_format(value: &str, format: &str) -> Option<NaiveDateTime> {
    if format.contains("%H") {
        NaiveDateTime::parse_from_str(value, format).ok()
    } else {
        NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    }
}

impl fmt::Display for DateFormatPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateFormatPolicy {
    type Err = LoadError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UK" => Ok(DateFormatPolicy::UK),
            "US" => Ok(DateFormatPolicy::US),
            other => Err(LoadError::config(format!(
                "Unknown date format '{other}'. Expected UK or US"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid date")
    }

    #[test]
    fn ambiguous_dates_follow_the_policy() {
        assert_eq!(DateFormatPolicy::UK.parse("01/02/2024"), Some(ymd(2024, 2, 1)));
        assert_eq!(DateFormatPolicy::US.parse("01/02/2024"), Some(ymd(2024, 1, 2)));
    }

    #[test]
    fn iso_values_parse_identically_under_both_policies() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 1)
            .and_then(|date| date.and_hms_opt(10, 0, 0))
            .expect("valid datetime");
        assert_eq!(DateFormatPolicy::UK.parse("2024-02-01 10:00"), Some(expected));
        assert_eq!(DateFormatPolicy::US.parse("2024-02-01 10:00"), Some(expected));
    }

    #[test]
    fn unambiguous_values_fall_back_to_the_other_order() {
        assert_eq!(DateFormatPolicy::UK.parse("12/31/2024"), Some(ymd(2024, 12, 31)));
        assert_eq!(DateFormatPolicy::US.parse("31/12/2024"), Some(ymd(2024, 12, 31)));
    }

    #[test]
    fn garbage_and_impossible_dates_are_rejected() {
        assert_eq!(DateFormatPolicy::UK.parse("2024-99-99"), None);
        assert_eq!(DateFormatPolicy::UK.parse("not a date"), None);
        assert_eq!(DateFormatPolicy::UK.parse("  "), None);
    }

    #[test]
    fn policy_tokens_parse_case_insensitively() {
        assert_eq!("us".parse::<DateFormatPolicy>().unwrap(), DateFormatPolicy::US);
        assert!("EU".parse::<DateFormatPolicy>().is_err());
    }

    proptest! {
        #[test]
        fn iso_dates_round_trip(y in 1990i32..2090, m in 1u32..=12, d in 1u32..=28) {
            let text = format!("{y:04}-{m:02}-{d:02}");
            prop_assert_eq!(DateFormatPolicy::UK.parse(&text), Some(ymd(y, m, d)));
            prop_assert_eq!(DateFormatPolicy::US.parse(&text), Some(ymd(y, m, d)));
        }
    }
}
