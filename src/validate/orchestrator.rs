//! Runs the validation phases over a staged batch and assembles the report.
//!
//! Phases run in a fixed order:
//! `Init → IndexCreation → SchemaCheck → Numeric → Date → String → Boolean →
//! Summary → Cleanup → Done`. Category phases only run when the dataset has
//! columns of that category. Numeric and date phases fan out one task per
//! column over a bounded rayon pool; every task opens its own session.
//!
//! A phase that errors is recorded in the report and the remaining phases
//! still run. Cancellation is the exception: it aborts the run, and the
//! temporary index guard still cleans up on the way out.

use std::fmt;

use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use crate::{
    db::{CancelToken, Database},
    error::{LoadError, Result},
    report::Reporter,
    types::{ColumnSpec, TypeCategory},
};

use super::{
    ColumnValidator, PhaseFailure, ValidationContext, ValidationIssue, ValidationReport,
    boolean::BooleanValidator, date::DateValidator, indexes::TempIndexGuard,
    numeric::NumericValidator, schema::SchemaValidator, string::StringValidator,
};

pub const DEFAULT_WORKERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    IndexCreation,
    SchemaCheck,
    Numeric,
    Date,
    String,
    Boolean,
    Summary,
    Cleanup,
    Done,
}

impl Phase {
    /// Progress fraction reported when the phase starts.
    pub fn fraction(&self) -> f64 {
        match self {
            Phase::Init => 0.1,
            Phase::IndexCreation => 0.15,
            Phase::SchemaCheck => 0.2,
            Phase::Numeric => 0.3,
            Phase::Date => 0.5,
            Phase::String => 0.7,
            Phase::Boolean => 0.8,
            Phase::Summary => 0.9,
            Phase::Cleanup => 0.95,
            Phase::Done => 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Init => "Init",
            Phase::IndexCreation => "IndexCreation",
            Phase::SchemaCheck => "SchemaCheck",
            Phase::Numeric => "Numeric",
            Phase::Date => "Date",
            Phase::String => "String",
            Phase::Boolean => "Boolean",
            Phase::Summary => "Summary",
            Phase::Cleanup => "Cleanup",
            Phase::Done => "Done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    pub workers: usize,
    pub create_temp_indexes: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            create_temp_indexes: true,
        }
    }
}

/// The category phases, in execution order.
const CATEGORY_PHASES: [(Phase, TypeCategory, bool); 4] = [
    (Phase::Numeric, TypeCategory::Numeric, true),
    (Phase::Date, TypeCategory::DateTime, true),
    (Phase::String, TypeCategory::String, false),
    (Phase::Boolean, TypeCategory::Boolean, false),
];

pub struct ValidationOrchestrator<'a> {
    db: &'a Database,
    cancel: &'a CancelToken,
    reporter: &'a Reporter,
    options: ValidationOptions,
}

impl<'a> ValidationOrchestrator<'a> {
    pub fn new(
        db: &'a Database,
        cancel: &'a CancelToken,
        reporter: &'a Reporter,
        options: ValidationOptions,
    ) -> Self {
        Self {
            db,
            cancel,
            reporter,
            options,
        }
    }

    pub fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidationReport> {
        self.enter(Phase::Init, &format!("{} row(s) in {}", ctx.total_rows, ctx.staging));
        self.cancel.check()?;
        let pool = build_pool(self.options.workers)?;
        let mut issues: Vec<ValidationIssue> = Vec::new();
        let mut failures: Vec<PhaseFailure> = Vec::new();

        let mut guard = if self.options.create_temp_indexes {
            self.enter(Phase::IndexCreation, "creating temporary indexes");
            let columns = ctx.required.iter().collect::<Vec<_>>();
            Some(TempIndexGuard::create(
                self.db,
                self.cancel,
                ctx.staging,
                &columns,
                self.reporter,
            ))
        } else {
            None
        };

        self.enter(Phase::SchemaCheck, &format!("comparing with {}", ctx.final_table));
        let outcome = self
            .db
            .connect(self.cancel)
            .and_then(|session| SchemaValidator.validate(&session, ctx, &[]));
        self.absorb(Phase::SchemaCheck, outcome, &mut issues, &mut failures)?;

        for (phase, category, concurrent) in CATEGORY_PHASES {
            let columns = ctx.required.in_category(category);
            if columns.is_empty() {
                continue;
            }
            self.enter(phase, &format!("{} column(s)", columns.len()));
            let validator: &dyn ColumnValidator = match phase {
                Phase::Numeric => &NumericValidator,
                Phase::Date => &DateValidator,
                Phase::String => &StringValidator,
                _ => &BooleanValidator,
            };
            if concurrent {
                let per_column = self.run_concurrent(&pool, validator, ctx, &columns);
                self.absorb_columns(phase, &columns, per_column, &mut issues, &mut failures)?;
            } else {
                let outcome = self
                    .db
                    .connect(self.cancel)
                    .and_then(|session| validator.validate(&session, ctx, &columns));
                self.absorb(phase, outcome, &mut issues, &mut failures)?;
            }
        }

        self.enter(Phase::Summary, &format!("{} issue(s)", issues.len()));
        let report = ValidationReport::from_issues(ctx.total_rows, issues, failures);

        if let Some(guard) = guard.as_mut() {
            self.enter(Phase::Cleanup, "dropping temporary indexes");
            guard.cleanup();
        }
        self.enter(Phase::Done, &report.summary);
        if report.is_valid {
            self.reporter.info(&report.summary);
        } else {
            self.reporter.warn(&report.summary);
        }
        Ok(report)
    }

    /// One task per column on the pool; each task owns its session. Results
    /// come back in column order.
    fn run_concurrent(
        &self,
        pool: &ThreadPool,
        validator: &dyn ColumnValidator,
        ctx: &ValidationContext<'_>,
        columns: &[&ColumnSpec],
    ) -> Vec<Result<Vec<ValidationIssue>>> {
        pool.install(|| {
            columns
                .par_iter()
                .map(|column| {
                    let session = self.db.connect(self.cancel)?;
                    validator.validate(&session, ctx, &[*column])
                })
                .collect()
        })
    }

    /// Like [`Self::absorb`], but a failing column is recorded on its own and
    /// the other columns' issues are kept.
    fn absorb_columns(
        &self,
        phase: Phase,
        columns: &[&ColumnSpec],
        per_column: Vec<Result<Vec<ValidationIssue>>>,
        issues: &mut Vec<ValidationIssue>,
        failures: &mut Vec<PhaseFailure>,
    ) -> Result<()> {
        let mut cancelled = None;
        for (column, result) in columns.iter().zip(per_column) {
            match result {
                Ok(found) => issues.extend(found),
                Err(err) if err.is_cancellation() => cancelled = Some(err),
                Err(err) => {
                    self.reporter.warn(&format!(
                        "Validation phase {phase} failed for column '{}': {err}",
                        column.name
                    ));
                    failures.push(PhaseFailure {
                        phase: phase.name().to_string(),
                        column: Some(column.name.clone()),
                        error: err.to_string(),
                    });
                }
            }
        }
        cancelled.map_or(Ok(()), Err)
    }

    fn absorb(
        &self,
        phase: Phase,
        outcome: Result<Vec<ValidationIssue>>,
        issues: &mut Vec<ValidationIssue>,
        failures: &mut Vec<PhaseFailure>,
    ) -> Result<()> {
        match outcome {
            Ok(found) => {
                issues.extend(found);
                Ok(())
            }
            Err(err) if err.is_cancellation() => Err(err),
            Err(err) => {
                self.reporter
                    .warn(&format!("Validation phase {phase} failed: {err}"));
                failures.push(PhaseFailure {
                    phase: phase.name().to_string(),
                    column: None,
                    error: err.to_string(),
                });
                Ok(())
            }
        }
    }

    fn enter(&self, phase: Phase, detail: &str) {
        self.reporter.progress(phase.fraction(), phase.name(), detail);
    }
}

fn build_pool(workers: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|idx| format!("tabload-validate-{idx}"))
        .build()
        .map_err(|err| LoadError::config(format!("failed to build validation pool: {err}")))
}
