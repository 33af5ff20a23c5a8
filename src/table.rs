//! Plain-text tables for the CLI's human-readable output.

use std::{borrow::Cow, fmt::Write as _};

use crate::{
    diagnostics::ProblemColumn,
    introspect::{IndexInfo, LiveColumn},
    validate::ValidationIssue,
};

pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let separator = widths
        .iter()
        .map(|w| "-".repeat((*w).max(3)))
        .collect::<Vec<_>>();
    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &separator_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn render_issues(issues: &[ValidationIssue]) -> String {
    let rows = issues
        .iter()
        .map(|issue| {
            vec![
                issue.severity.to_string(),
                issue.category.to_string(),
                issue.column.clone(),
                format!("{}/{}", issue.error_count, issue.total_rows),
                format!("{:.2}%", issue.percentage),
                issue
                    .message
                    .clone()
                    .unwrap_or_else(|| issue.examples.join(" | ")),
            ]
        })
        .collect::<Vec<_>>();
    render_table(
        &["severity", "category", "column", "rows", "percent", "detail"],
        &rows,
    )
}

pub fn render_problem_columns(problems: &[ProblemColumn]) -> String {
    let rows = problems
        .iter()
        .map(|problem| {
            vec![
                problem.column.clone(),
                problem.problem.clone(),
                problem.examples.join(" | "),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["column", "problem", "examples"], &rows)
}

pub fn render_columns(columns: &[LiveColumn]) -> String {
    let rows = columns
        .iter()
        .map(|column| {
            vec![
                column.ordinal.to_string(),
                column.name.clone(),
                column.data_type.clone(),
                column.category().to_string(),
                if column.nullable { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["#", "column", "type", "category", "nullable"], &rows)
}

pub fn render_indexes(indexes: &[IndexInfo]) -> String {
    let rows = indexes
        .iter()
        .map(|index| {
            vec![
                index.name.clone(),
                if index.is_unique { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["index", "unique"], &rows)
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let cells = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let sanitized = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&sanitized));
            format!("{sanitized}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{IssueCategory, Severity};

    #[test]
    fn pads_columns_and_trims_trailing_space() {
        let rendered = render_table(
            &["a", "long header"],
            &[vec!["value".to_string(), "x".to_string()]],
        );
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines[0], "a      long header");
        assert_eq!(lines[1], "-----  -----------");
        assert_eq!(lines[2], "value  x");
    }

    #[test]
    fn issue_rows_show_counts_and_examples() {
        let issue = ValidationIssue::data(
            IssueCategory::Numeric,
            "amount",
            3,
            4,
            vec!["abc".to_string(), "x\ty".to_string()],
        );
        let rendered = render_issues(&[issue]);
        assert!(rendered.contains("error"));
        assert!(rendered.contains("3/4"));
        assert!(rendered.contains("75.00%"));
        assert!(rendered.contains("abc | x y"));
        assert_eq!(Severity::Error.to_string(), "error");
    }
}
